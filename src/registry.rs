// ABOUTME: Provider handlers that decorate outbound PDUs with provider-specific optional parameters
// ABOUTME: A registry maps lower-cased provider names to handlers and falls back to the default one

use crate::datatypes::{Tlv, tags};
use crate::manager::SmsRequest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name every registry resolves unknown providers to.
pub const DEFAULT_PROVIDER: &str = "default";

/// Adds provider-specific TLVs to each PDU of an outbound message.
pub trait ProviderHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per part, after concatenation has added its own TLVs.
    fn prepare_submit(&self, request: &SmsRequest, tlvs: &mut Vec<Tlv>);
}

/// Leaves PDUs untouched.
#[derive(Debug, Default)]
pub struct DefaultProvider;

impl ProviderHandler for DefaultProvider {
    fn name(&self) -> &str {
        DEFAULT_PROVIDER
    }

    fn prepare_submit(&self, _request: &SmsRequest, _tlvs: &mut Vec<Tlv>) {}
}

/// Maps request params onto the custom owner / message id / message time
/// parameters, plus raw `0xNNNN` tags carrying the value as UTF-8.
#[derive(Debug, Default)]
pub struct CustomTlvProvider;

impl CustomTlvProvider {
    pub const NAME: &'static str = "custom_tlv";

    fn param_tlv(key: &str, value: &str) -> Option<Tlv> {
        match key.to_ascii_lowercase().as_str() {
            "owner" => match value.trim().parse::<i32>() {
                Ok(owner) => Some(Tlv::new(tags::OWNER, owner.to_be_bytes().to_vec())),
                Err(_) => {
                    warn!(value, "invalid owner parameter");
                    None
                }
            },
            "messageid" if !value.is_empty() => {
                Some(Tlv::new(tags::MESSAGE_ID, value.as_bytes().to_vec()))
            }
            "messagetime" if !value.is_empty() => {
                Some(Tlv::new(tags::MESSAGE_TIME, value.as_bytes().to_vec()))
            }
            other => {
                let hex = other.strip_prefix("0x")?;
                match u16::from_str_radix(hex, 16) {
                    Ok(tag) => Some(Tlv::new(tag, value.as_bytes().to_vec())),
                    Err(_) => {
                        warn!(tag = other, "invalid TLV tag parameter");
                        None
                    }
                }
            }
        }
    }
}

impl ProviderHandler for CustomTlvProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn prepare_submit(&self, request: &SmsRequest, tlvs: &mut Vec<Tlv>) {
        for (key, value) in &request.params {
            if let Some(tlv) = Self::param_tlv(key, value) {
                debug!(tag = format_args!("0x{:04X}", tlv.tag), "adding custom TLV");
                tlvs.push(tlv);
            }
        }
    }
}

/// Provider handlers by name. Populated at startup, read-only afterwards.
#[derive(Clone)]
pub struct ProviderRegistry {
    handlers: HashMap<String, Arc<dyn ProviderHandler>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry").field("handlers", &names).finish()
    }
}

impl Default for ProviderRegistry {
    /// The built-in `default` and `custom_tlv` handlers.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DefaultProvider));
        registry.register(Arc::new(CustomTlvProvider));
        registry
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the default handler.
    pub fn empty() -> Self {
        let mut handlers: HashMap<String, Arc<dyn ProviderHandler>> = HashMap::new();
        handlers.insert(DEFAULT_PROVIDER.to_string(), Arc::new(DefaultProvider));
        Self { handlers }
    }

    /// Add or replace a handler under its lower-cased name.
    pub fn register(&mut self, handler: Arc<dyn ProviderHandler>) {
        self.handlers.insert(handler.name().to_lowercase(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_lowercase())
    }

    /// Handler for `name`, or the default one when `name` is absent or unknown.
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn ProviderHandler> {
        let key = name.map(str::to_lowercase);
        if let Some(handler) = key.as_ref().and_then(|key| self.handlers.get(key)) {
            return handler.clone();
        }
        if let Some(name) = name {
            warn!(provider = name, "unknown provider, using default");
        }
        self.handlers
            .get(DEFAULT_PROVIDER)
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultProvider))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::find_tlv;

    fn request(params: &[(&str, &str)]) -> SmsRequest {
        let mut request = SmsRequest::new("1000", "2000", "hello");
        for (key, value) in params {
            request = request.param(*key, *value);
        }
        request
    }

    #[test]
    fn resolves_case_insensitively_with_default_fallback() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.resolve(Some("CUSTOM_TLV")).name(), "custom_tlv");
        assert_eq!(registry.resolve(Some("nope")).name(), DEFAULT_PROVIDER);
        assert_eq!(registry.resolve(None).name(), DEFAULT_PROVIDER);
        assert_eq!(registry.names(), ["custom_tlv", "default"]);
    }

    #[test]
    fn default_provider_adds_nothing() {
        let mut tlvs = Vec::new();
        DefaultProvider.prepare_submit(&request(&[("owner", "5")]), &mut tlvs);
        assert!(tlvs.is_empty());
    }

    #[test]
    fn custom_tlv_maps_params() {
        let mut tlvs = Vec::new();
        let request = request(&[
            ("owner", "258"),
            ("MessageId", "ext-1"),
            ("messagetime", "2024-01-01 10:00"),
            ("0x1500", "raw"),
            ("0xZZ", "bad"),
            ("ignored", "x"),
        ]);
        CustomTlvProvider.prepare_submit(&request, &mut tlvs);

        assert_eq!(tlvs.len(), 4);
        assert_eq!(find_tlv(&tlvs, tags::OWNER).unwrap().as_u32(), Some(258));
        assert_eq!(&find_tlv(&tlvs, tags::MESSAGE_ID).unwrap().value[..], b"ext-1");
        assert_eq!(
            &find_tlv(&tlvs, tags::MESSAGE_TIME).unwrap().value[..],
            b"2024-01-01 10:00"
        );
        assert_eq!(&find_tlv(&tlvs, 0x1500).unwrap().value[..], b"raw");
    }

    #[test]
    fn invalid_owner_is_skipped() {
        let mut tlvs = Vec::new();
        CustomTlvProvider.prepare_submit(&request(&[("owner", "abc")]), &mut tlvs);
        assert!(tlvs.is_empty());
    }
}
