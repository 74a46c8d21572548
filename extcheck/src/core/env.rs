//! Child environment composition.

use crate::core::protocol::EnvVars;

/// Layers of the child environment, lowest precedence first.
#[derive(Debug, Clone, Copy)]
pub struct EnvLayers<'a> {
    /// Environment of the host process.
    pub base: &'a EnvVars,
    /// Variables passed with the individual call.
    pub call: &'a EnvVars,
    /// Defaults configured on the client.
    pub client: &'a EnvVars,
    /// Variables produced by the context injector and message reader.
    pub transport: &'a EnvVars,
}

/// Merge layers so that later layers override earlier ones.
///
/// Transport variables are applied last: channel wiring cannot be shadowed.
pub fn compose_env(layers: EnvLayers<'_>) -> EnvVars {
    let mut env = EnvVars::new();
    for layer in [layers.base, layers.call, layers.client, layers.transport] {
        env.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env
}
