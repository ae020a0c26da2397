//! Vector-table parsing and per-exception enablement (spec §4.8/§6).
//!
//! The ARMv6-M vector table fixes Reset/NMI/HardFault/SVCall/PendSV/SysTick
//! at specific offsets, with external interrupts starting at offset 16.
//! What's configurable is whether each optional entry is actually used
//! (affecting whether its group contributes to the worst case) and, for the
//! preemptible ones, its priority group.

use std::collections::BTreeSet;

use crate::config::{DefaultHandlerConfig, EntrypointsConfig, ExceptionConfigurableConfig, ExceptionOptionalConfig, PriorityGroupDetail, Tristate};
use crate::entrypoints::{ExceptionClass, RawEntrypoint};
use crate::error::{Error, Result};
use crate::model::{Address, FunctionIndex, RawFunction};

const DEFAULT_HANDLER_NAMES: [&str; 2] = ["DefaultHandler", "DefaultHandler_"];

/// Resolves the vector table's raw bytes into entrypoint descriptors,
/// applying `config` to decide what's enabled and at what priority.
pub fn resolve_entrypoints(vector_table: &[u8], functions: &FunctionIndex<RawFunction>, config: &EntrypointsConfig) -> Result<Vec<RawEntrypoint>> {
    if vector_table.len() % 4 != 0 {
        return Err(Error::InputFormat(format!("vector table size {} is not a multiple of 4", vector_table.len())));
    }
    let entry_count = vector_table.len() / 4;
    if !(16..=48).contains(&entry_count) {
        return Err(Error::InputFormat(format!("vector table has {entry_count} entries, expected 16..=48")));
    }

    let default_handler = resolve_default_handler(functions, &config.default_handler)?;

    let mut reset = None;
    let mut nmi = None;
    let mut hardfault = None;
    let mut svcall = None;
    let mut pendsv = None;
    let mut systick = None;
    let mut interrupts = Vec::new();

    let interrupt_configs = config.interrupts.by_number();

    for index in 1..entry_count {
        let raw = u32::from_le_bytes(vector_table[index * 4..index * 4 + 4].try_into().unwrap());
        let function = if raw != 0 {
            if raw & 1 != 1 {
                return Err(Error::InputFormat(format!("thumb bit not set for vector #{index} at {raw:#x}")));
            }
            let address = raw & !1;
            Some(functions.get(address).ok_or_else(|| Error::InputFormat(format!("vector #{index} points to non-existing function at {raw:#x}")))?)
        } else {
            None
        };

        match index {
            1 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for Reset".into()))?;
                warn_if_enabled_mismatch("Reset", function.address, default_handler);
                reset = Some(RawEntrypoint { address: function.address, name: "Reset".into(), class: ExceptionClass::Reset });
            }
            2 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for NMI".into()))?;
                nmi = resolve_optional("NMI", function, &config.nmi, default_handler);
            }
            3 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for HardFault".into()))?;
                warn_if_enabled_mismatch("HardFault", function.address, default_handler);
                hardfault = Some(RawEntrypoint { address: function.address, name: "HardFault".into(), class: ExceptionClass::NonConfigurable });
            }
            11 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for SVCall".into()))?;
                svcall = resolve_configurable("SVCall", function, &config.svcall, default_handler);
            }
            14 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for PendSV".into()))?;
                pendsv = resolve_configurable("PendSV", function, &config.pendsv, default_handler);
            }
            15 => {
                let function = function.ok_or_else(|| Error::InputFormat("missing vector table entry for SysTick".into()))?;
                systick = resolve_configurable("SysTick", function, &config.systick, default_handler);
            }
            n if n < 16 => {
                if let Some(function) = function {
                    log::warn!("reserved exception #{n} points to a function at {:#x}", function.address);
                }
            }
            n => {
                let interrupt_number = (n - 16) as u8;
                let interrupt_config = interrupt_configs.get(&interrupt_number);
                match function {
                    Some(function) => {
                        if let Some(entrypoint) = resolve_interrupt(interrupt_number, function, interrupt_config, default_handler) {
                            interrupts.push(entrypoint);
                        }
                    }
                    None => {
                        if interrupt_config.is_some() {
                            log::warn!("interrupt #{interrupt_number} has no vector table entry but a config entry was provided");
                        }
                    }
                }
            }
        }
    }

    let mut resolved = vec![reset.expect("checked above"), hardfault.expect("checked above")];
    resolved.extend([nmi, svcall, pendsv, systick].into_iter().flatten());
    resolved.extend(interrupts);
    Ok(resolved)
}

fn resolve_default_handler(functions: &FunctionIndex<RawFunction>, config: &DefaultHandlerConfig) -> Result<Option<Address>> {
    match config {
        DefaultHandlerConfig::Bool(true) => {
            let matches: Vec<Address> = DEFAULT_HANDLER_NAMES.iter().filter_map(|name| functions.get_by_name(name)).map(|f| f.address).collect();
            match matches.as_slice() {
                [address] => Ok(Some(*address)),
                [] => {
                    log::warn!("no default handler found by name, disabling default-handler detection");
                    Ok(None)
                }
                _ => {
                    log::warn!("multiple default handler name matches, disabling default-handler detection");
                    Ok(None)
                }
            }
        }
        DefaultHandlerConfig::Bool(false) => Ok(None),
        DefaultHandlerConfig::Address(address) => functions
            .get(*address)
            .map(|f| Some(f.address))
            .ok_or_else(|| Error::Config(format!("default handler address {address:#x} not found"))),
        DefaultHandlerConfig::Name(name) => {
            functions.get_by_name(name).map(|f| Some(f.address)).ok_or_else(|| Error::Config(format!("default handler `{name}` not found")))
        }
    }
}

fn warn_if_enabled_mismatch(name: &str, function_address: Address, default_handler: Option<Address>) {
    if default_handler == Some(function_address) {
        log::warn!("`{name}` is enabled but points to the default handler");
    }
}

fn warn_if_disabled_mismatch(name: &str, function_address: Address, default_handler: Option<Address>) {
    if let Some(default_handler) = default_handler {
        if function_address != default_handler {
            log::warn!("`{name}` is disabled but points to a non-default handler");
        }
    }
}

fn resolve_optional(name: &str, function: &RawFunction, config: &ExceptionOptionalConfig, default_handler: Option<Address>) -> Option<RawEntrypoint> {
    match config {
        Tristate::Bool(true) => {
            warn_if_enabled_mismatch(name, function.address, default_handler);
        }
        Tristate::Bool(false) => {
            warn_if_disabled_mismatch(name, function.address, default_handler);
            return None;
        }
        Tristate::Autodetect | Tristate::Detailed(()) => match default_handler {
            None => log::warn!("`{name}` is auto-configured but no default handler is known, assuming enabled"),
            Some(default_handler) if default_handler == function.address => return None,
            Some(_) => {}
        },
    }
    Some(RawEntrypoint { address: function.address, name: name.to_string(), class: ExceptionClass::NonConfigurable })
}

fn resolve_configurable(
    name: &str,
    function: &RawFunction,
    config: &ExceptionConfigurableConfig,
    default_handler: Option<Address>,
) -> Option<RawEntrypoint> {
    let priority_group = match config {
        Tristate::Detailed(PriorityGroupDetail { priority_group }) => {
            warn_if_enabled_mismatch(name, function.address, default_handler);
            *priority_group
        }
        Tristate::Bool(true) => {
            warn_if_enabled_mismatch(name, function.address, default_handler);
            None
        }
        Tristate::Bool(false) => {
            warn_if_disabled_mismatch(name, function.address, default_handler);
            return None;
        }
        Tristate::Autodetect => match default_handler {
            None => {
                log::warn!("`{name}` is auto-configured but no default handler is known, assuming enabled");
                None
            }
            Some(default_handler) if default_handler == function.address => return None,
            Some(_) => None,
        },
    };
    if priority_group.is_none() {
        log::warn!("`{name}` has no configured priority group, assuming worst case");
    }
    Some(RawEntrypoint { address: function.address, name: name.to_string(), class: ExceptionClass::Configurable { priority_group } })
}

fn resolve_interrupt(
    number: u8,
    function: &RawFunction,
    config: Option<&&crate::config::InterruptConfigEntry>,
    default_handler: Option<Address>,
) -> Option<RawEntrypoint> {
    let name = config
        .and_then(|c| c.name.clone())
        .unwrap_or_else(|| if function.names.len() == 1 { function.primary_name().to_string() } else { format!("Interrupt #{number} (autogenerated)") });

    let default_config = ExceptionConfigurableConfig::Autodetect;
    let resolved_config = config.map(|c| &c.config).unwrap_or(&default_config);

    let priority_group = match resolved_config {
        Tristate::Detailed(PriorityGroupDetail { priority_group }) => {
            warn_if_enabled_mismatch(&name, function.address, default_handler);
            *priority_group
        }
        Tristate::Bool(true) => {
            warn_if_enabled_mismatch(&name, function.address, default_handler);
            None
        }
        Tristate::Bool(false) => {
            warn_if_disabled_mismatch(&name, function.address, default_handler);
            return None;
        }
        Tristate::Autodetect => match default_handler {
            None => {
                log::warn!("interrupt #{number} is auto-configured but no default handler is known, assuming enabled");
                None
            }
            Some(default_handler) if default_handler == function.address => return None,
            Some(_) => None,
        },
    };
    if priority_group.is_none() {
        log::warn!("interrupt #{number} has no configured priority group, assuming worst case");
    }

    Some(RawEntrypoint { address: function.address, name, class: ExceptionClass::Configurable { priority_group } })
}

#[allow(dead_code)]
fn unused(_: &BTreeSet<Address>) {}
