//! Cross-crate scenarios.

#[cfg(test)]
mod harness;
#[cfg(test)]
mod target_flows;
#[cfg(test)]
mod trigger_flows;
