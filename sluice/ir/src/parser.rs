//! Decoding of module declarations received from clients.
use crate::module::Module;
use sluice_utils::SluiceResult;

/// Turns the bytes of a compile request into a module tree.
pub trait Parser: Send + Sync {
    fn parse(&self, text: &[u8]) -> SluiceResult<Module>;
}

/// Parses the JSON serialization of [Module] and validates the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, text: &[u8]) -> SluiceResult<Module> {
        let module: Module = serde_json::from_slice(text)?;
        module.validate()?;
        Ok(module)
    }
}

/// Serializes a module the way [JsonParser] expects it.
pub fn to_json(module: &Module) -> SluiceResult<Vec<u8>> {
    Ok(serde_json::to_vec(module)?)
}
