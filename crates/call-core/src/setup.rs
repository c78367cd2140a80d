//! Session setup
//!
//! [`SessionSetupFlow::resolve`] turns an untrusted trigger (a push payload
//! or a number the user dialed) into a validated [`CallInit`] holding the
//! device's single call slot. Nothing is started here; the result is handed
//! to [`CallSessionController::start`](crate::controller::CallSessionController::start).
//!
//! The single-slot check runs before anything else, so a second trigger
//! while a call is live fails with `CallAlreadyActive` without side effects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::call::{AccessToken, CallDirection, CallId, CallInit, Party};
use crate::config::CallConfig;
use crate::error::{SetupError, SetupResult};
use crate::recovery::with_timeout;
use crate::registry::CallSlotRegistry;
use crate::signaling::CallInitiator;

const MAX_HANDLE_LEN: usize = 64;
const MAX_DISPLAY_NAME_LEN: usize = 128;

/// What asked for a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupTrigger {
    /// Raw push payload text
    Push { payload: String },
    /// The user dialed `destination`
    Dial {
        destination: String,
        display_name: Option<String>,
    },
}

impl SetupTrigger {
    pub fn push(payload: impl Into<String>) -> Self {
        SetupTrigger::Push {
            payload: payload.into(),
        }
    }

    pub fn dial(destination: impl Into<String>) -> Self {
        SetupTrigger::Dial {
            destination: destination.into(),
            display_name: None,
        }
    }
}

/// Source of the app's API token for the call-initiation endpoint
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn api_token(&self) -> Option<String>;
}

/// Validated fields of an inbound call push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
    pub call_id: CallId,
    pub access_token: AccessToken,
    pub caller: Party,
    pub receptor_handle: Option<String>,
}

impl PushPayload {
    /// Parse a push payload.
    ///
    /// Accepts either the bare call object or an APNs envelope whose
    /// `aps.alert.body` (or `aps.alert`) is the call object as JSON text.
    pub fn parse(raw: &str, max_call_id_len: usize) -> SetupResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SetupError::malformed(format!("payload is not JSON: {}", e)))?;
        let body = unwrap_envelope(value)?;
        let fields = match body {
            Value::Object(fields) => fields,
            _ => return Err(SetupError::malformed("call payload must be an object")),
        };

        if let Some(direction) = string_field(&fields, &["direction"])? {
            if direction != "inbound" {
                return Err(SetupError::malformed(format!(
                    "unsupported push direction '{}'",
                    direction
                )));
            }
        }

        let call_id = string_field(&fields, &["id", "callId", "call_id"])?
            .ok_or_else(|| SetupError::malformed("missing call id"))?;
        let call_id = validate_call_id(call_id, max_call_id_len)?;

        let caller_handle = string_field(&fields, &["callerHandle", "caller", "caller_handle"])?
            .ok_or_else(|| SetupError::malformed("missing caller handle"))?;
        let mut caller = Party::new(validate_handle("caller handle", caller_handle)?);
        if let Some(name) = string_field(&fields, &["callerName", "caller_name"])? {
            caller = caller.with_display_name(validate_display_name(name)?);
        }

        let receptor_handle = string_field(&fields, &["receptorHandle", "receptor", "receptor_handle"])?
            .map(|h| validate_handle("receptor handle", h).map(str::to_string))
            .transpose()?;

        let access_token = string_field(&fields, &["accessToken", "access_token"])?
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SetupError::credential_missing("access token"))?;

        Ok(Self {
            call_id,
            access_token: AccessToken::new(access_token),
            caller,
            receptor_handle,
        })
    }
}

fn unwrap_envelope(value: Value) -> SetupResult<Value> {
    let Some(aps) = value.get("aps") else {
        return Ok(value);
    };
    let alert = aps
        .get("alert")
        .ok_or_else(|| SetupError::malformed("push envelope without alert"))?;
    let body = match alert {
        Value::String(body) => body,
        Value::Object(alert) => match alert.get("body") {
            Some(Value::String(body)) => body,
            _ => return Err(SetupError::malformed("push alert without text body")),
        },
        _ => return Err(SetupError::malformed("push alert has unexpected type")),
    };
    serde_json::from_str(body)
        .map_err(|e| SetupError::malformed(format!("push body is not JSON: {}", e)))
}

/// First present key among `names`; present but non-string is malformed
fn string_field<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> SetupResult<Option<&'a str>> {
    for name in names {
        match fields.get(*name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(Some(s.as_str())),
            Some(_) => {
                return Err(SetupError::malformed(format!("field '{}' must be a string", name)));
            }
        }
    }
    Ok(None)
}

fn validate_call_id(raw: &str, max_len: usize) -> SetupResult<CallId> {
    if raw.is_empty() {
        return Err(SetupError::malformed("empty call id"));
    }
    if raw.len() > max_len {
        return Err(SetupError::malformed(format!(
            "call id longer than {} bytes",
            max_len
        )));
    }
    if raw.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(SetupError::malformed("call id contains invalid characters"));
    }
    Ok(CallId::new(raw))
}

fn validate_handle<'a>(what: &str, raw: &'a str) -> SetupResult<&'a str> {
    let handle = raw.trim();
    if handle.is_empty() {
        return Err(SetupError::malformed(format!("empty {}", what)));
    }
    if handle.len() > MAX_HANDLE_LEN {
        return Err(SetupError::malformed(format!("{} too long", what)));
    }
    let allowed = |c: char| c.is_alphanumeric() || "+-_.@#*() ".contains(c);
    if !handle.chars().all(allowed) {
        return Err(SetupError::malformed(format!("{} contains invalid characters", what)));
    }
    Ok(handle)
}

fn validate_display_name(raw: &str) -> SetupResult<&str> {
    let name = raw.trim();
    if name.len() > MAX_DISPLAY_NAME_LEN || name.chars().any(char::is_control) {
        return Err(SetupError::malformed("invalid display name"));
    }
    Ok(name)
}

/// One-shot procedure from trigger to [`CallInit`]
pub struct SessionSetupFlow {
    config: CallConfig,
    registry: CallSlotRegistry,
    credentials: Arc<dyn CredentialProvider>,
    initiator: Arc<dyn CallInitiator>,
}

impl SessionSetupFlow {
    pub fn new(
        config: CallConfig,
        registry: CallSlotRegistry,
        credentials: Arc<dyn CredentialProvider>,
        initiator: Arc<dyn CallInitiator>,
    ) -> Self {
        Self {
            config,
            registry,
            credentials,
            initiator,
        }
    }

    pub fn registry(&self) -> &CallSlotRegistry {
        &self.registry
    }

    /// Validate `trigger` and claim the call slot for it
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use mobicall_call_core::{CallConfig, CallDirection, CallSlotRegistry, SessionSetupFlow, SetupTrigger};
    /// # use mobicall_call_core::loopback::{LoopbackInitiator, StaticCredentials};
    /// # tokio_test::block_on(async {
    /// let flow = SessionSetupFlow::new(
    ///     CallConfig::new("+98935"),
    ///     CallSlotRegistry::new(),
    ///     Arc::new(StaticCredentials::new(None)),
    ///     Arc::new(LoopbackInitiator::new()),
    /// );
    /// let push = r#"{"direction":"inbound","callerHandle":"+98912","accessToken":"tok1","id":"c1"}"#;
    /// let init = flow.resolve(SetupTrigger::push(push)).await.unwrap();
    /// assert_eq!(init.direction, CallDirection::Inbound);
    /// assert!(flow.resolve(SetupTrigger::push(push)).await.is_err());
    /// # });
    /// ```
    pub async fn resolve(&self, trigger: SetupTrigger) -> SetupResult<CallInit> {
        self.registry.ensure_vacant()?;

        let result = match trigger {
            SetupTrigger::Push { payload } => self.resolve_push(&payload),
            SetupTrigger::Dial {
                destination,
                display_name,
            } => self.resolve_dial(&destination, display_name.as_deref()).await,
        };

        match &result {
            Ok(init) => info!(
                call_id = %init.id,
                direction = %init.direction,
                remote = %init.remote_handle(),
                "Call setup resolved"
            ),
            Err(e) => warn!(error = %e, "Call setup rejected"),
        }
        result
    }

    fn resolve_push(&self, payload: &str) -> SetupResult<CallInit> {
        let push = PushPayload::parse(payload, self.config.max_call_id_len)?;
        debug!(call_id = %push.call_id, "Push payload parsed");

        let receptor = Party::new(
            push.receptor_handle
                .unwrap_or_else(|| self.config.local_handle.clone()),
        );
        let slot = self.registry.acquire(&push.call_id)?;
        Ok(CallInit::new(
            slot,
            CallDirection::Inbound,
            push.access_token,
            push.caller,
            receptor,
        ))
    }

    async fn resolve_dial(
        &self,
        destination: &str,
        display_name: Option<&str>,
    ) -> SetupResult<CallInit> {
        let destination = validate_handle("destination", destination)?;
        let display_name = display_name.map(validate_display_name).transpose()?;

        let api_token = self
            .credentials
            .api_token()
            .await
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SetupError::credential_missing("api token"))?;

        // held across the initiator call so a concurrent trigger cannot take
        // the slot after the remote call exists
        let mut slot = self
            .registry
            .acquire(&CallId::new(format!("dial:{}", destination)))?;

        let initiated = with_timeout(
            "initiate_call",
            self.config.signaling_request_timeout(),
            self.initiator.initiate(&api_token, destination),
        )
        .await
        .map_err(|e| SetupError::unreachable(e.to_string()))?
        .map_err(|e| SetupError::unreachable(e.to_string()))?;

        let call_id = validate_call_id(&initiated.call_id, self.config.max_call_id_len)
            .map_err(|_| SetupError::unreachable("backend returned an invalid call id"))?;
        if initiated.access_token.trim().is_empty() {
            return Err(SetupError::credential_missing("access token"));
        }

        let mut receptor = Party::new(destination);
        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            receptor = receptor.with_display_name(name);
        }
        slot.rekey(call_id);
        Ok(CallInit::new(
            slot,
            CallDirection::Outbound,
            AccessToken::new(initiated.access_token),
            Party::new(self.config.local_handle.clone()),
            receptor,
        ))
    }
}

impl std::fmt::Debug for SessionSetupFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSetupFlow")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackInitiator, StaticCredentials};

    fn flow(registry: &CallSlotRegistry, token: Option<&str>) -> (SessionSetupFlow, Arc<LoopbackInitiator>) {
        let initiator = Arc::new(LoopbackInitiator::new());
        let flow = SessionSetupFlow::new(
            CallConfig::new("+98935"),
            registry.clone(),
            Arc::new(StaticCredentials::new(token.map(str::to_string))),
            initiator.clone(),
        );
        (flow, initiator)
    }

    const SCENARIO_PUSH: &str =
        r#"{"direction":"inbound","callerHandle":"+98912","accessToken":"tok1","id":"c1"}"#;

    #[test]
    fn test_parse_bare_payload() {
        let push = PushPayload::parse(SCENARIO_PUSH, 128).unwrap();
        assert_eq!(push.call_id, CallId::new("c1"));
        assert_eq!(push.access_token.expose(), "tok1");
        assert_eq!(push.caller.handle, "+98912");
        assert_eq!(push.receptor_handle, None);
    }

    #[test]
    fn test_parse_apns_envelope() {
        let body = serde_json::to_string(
            r#"{"callId":"c7","accessToken":"tok7","caller":"+98912","callerName":"Sara"}"#,
        )
        .unwrap();
        let raw = format!(r#"{{"aps":{{"alert":{{"title":"Call","body":{}}}}}}}"#, body);
        let push = PushPayload::parse(&raw, 128).unwrap();
        assert_eq!(push.call_id, CallId::new("c7"));
        assert_eq!(push.caller.label(), "Sara");
    }

    #[test]
    fn test_parse_rejects_untrusted_fields() {
        let cases = [
            "not json",
            "[1,2]",
            r#"{"id":42,"callerHandle":"+1","accessToken":"t"}"#,
            r#"{"id":"","callerHandle":"+1","accessToken":"t"}"#,
            r#"{"id":"a b","callerHandle":"+1","accessToken":"t"}"#,
            r#"{"id":"c1","accessToken":"t"}"#,
            r#"{"id":"c1","callerHandle":"<script>","accessToken":"t"}"#,
            r#"{"id":"c1","callerHandle":"+1","accessToken":"t","direction":"outbound"}"#,
            r#"{"aps":{"alert":{"body":"{oops"}}}"#,
            r#"{"aps":{"badge":1}}"#,
        ];
        for raw in cases {
            let err = PushPayload::parse(raw, 128).unwrap_err();
            assert!(
                matches!(err, SetupError::MalformedTrigger { .. }),
                "{} -> {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_parse_oversized_id() {
        let raw = format!(
            r#"{{"id":"{}","callerHandle":"+1","accessToken":"t"}}"#,
            "x".repeat(129)
        );
        assert!(matches!(
            PushPayload::parse(&raw, 128),
            Err(SetupError::MalformedTrigger { .. })
        ));
    }

    #[test]
    fn test_parse_missing_token_is_credential_missing() {
        let err = PushPayload::parse(r#"{"id":"c1","callerHandle":"+1","accessToken":"  "}"#, 128)
            .unwrap_err();
        assert_eq!(err, SetupError::credential_missing("access token"));
    }

    #[tokio::test]
    async fn test_resolve_push_claims_slot() {
        let registry = CallSlotRegistry::new();
        let (flow, _) = flow(&registry, None);

        let init = flow.resolve(SetupTrigger::push(SCENARIO_PUSH)).await.unwrap();
        assert_eq!(init.direction, CallDirection::Inbound);
        assert_eq!(init.receptor.handle, "+98935");
        assert_eq!(registry.active(), Some(CallId::new("c1")));
    }

    #[tokio::test]
    async fn test_second_trigger_rejected_while_active() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, Some("api"));

        let first = flow.resolve(SetupTrigger::push(SCENARIO_PUSH)).await.unwrap();
        let err = flow
            .resolve(SetupTrigger::push(
                r#"{"id":"c2","callerHandle":"+1","accessToken":"t"}"#,
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SetupError::CallAlreadyActive {
                active: CallId::new("c1")
            }
        );

        let err = flow.resolve(SetupTrigger::dial("+98913")).await.unwrap_err();
        assert!(matches!(err, SetupError::CallAlreadyActive { .. }));
        assert!(initiator.requests().is_empty());
        assert!(registry.is_held_by(first.slot()));
    }

    #[tokio::test]
    async fn test_malformed_trigger_leaves_slot_free() {
        let registry = CallSlotRegistry::new();
        let (flow, _) = flow(&registry, None);
        assert!(flow.resolve(SetupTrigger::push("{}")).await.is_err());
        assert!(registry.is_vacant());
    }

    #[tokio::test]
    async fn test_dial_requires_api_token() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, None);
        let err = flow.resolve(SetupTrigger::dial("+98913")).await.unwrap_err();
        assert_eq!(err, SetupError::credential_missing("api token"));
        assert!(initiator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_dial_uses_initiator_response() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, Some("api"));
        initiator.respond_with("out-1", "tok-out");

        let init = flow.resolve(SetupTrigger::dial("+98913")).await.unwrap();
        assert_eq!(init.id, CallId::new("out-1"));
        assert_eq!(init.direction, CallDirection::Outbound);
        assert_eq!(init.caller.handle, "+98935");
        assert_eq!(init.receptor.handle, "+98913");
        assert_eq!(init.access_token.expose(), "tok-out");
        assert_eq!(
            initiator.requests(),
            vec![("api".to_string(), "+98913".to_string())]
        );
    }

    #[tokio::test]
    async fn test_dial_initiator_failure_is_unreachable() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, Some("api"));
        initiator.fail_with_connection_error();

        let err = flow.resolve(SetupTrigger::dial("+98913")).await.unwrap_err();
        assert!(matches!(err, SetupError::UnreachableSignalingEndpoint { .. }));
        assert!(registry.is_vacant());
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_destination() {
        let registry = CallSlotRegistry::new();
        let (flow, _) = flow(&registry, Some("api"));
        let err = flow.resolve(SetupTrigger::dial("   ")).await.unwrap_err();
        assert!(matches!(err, SetupError::MalformedTrigger { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_holds_slot_while_initiating() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, Some("api"));
        initiator.respond_with("out-1", "tok-out");
        initiator.respond_after(std::time::Duration::from_millis(50));

        let (dial, push) = tokio::join!(
            flow.resolve(SetupTrigger::dial("+98913")),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                flow.resolve(SetupTrigger::push(SCENARIO_PUSH)).await
            }
        );

        let init = dial.unwrap();
        assert_eq!(init.id, CallId::new("out-1"));
        assert!(matches!(push, Err(SetupError::CallAlreadyActive { .. })));
        assert_eq!(registry.active(), Some(CallId::new("out-1")));
        assert!(registry.is_held_by(init.slot()));
    }

    #[tokio::test]
    async fn test_failed_dial_releases_reserved_slot() {
        let registry = CallSlotRegistry::new();
        let (flow, initiator) = flow(&registry, Some("api"));
        initiator.respond_with("bad id", "tok-out");

        let err = flow.resolve(SetupTrigger::dial("+98913")).await.unwrap_err();
        assert!(matches!(err, SetupError::UnreachableSignalingEndpoint { .. }));
        assert!(registry.is_vacant());
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_rejected_trigger_is_logged_without_token() {
        let registry = CallSlotRegistry::new();
        let (flow, _) = flow(&registry, None);
        let raw = r#"{"id":"c1","callerHandle":"<script>","accessToken":"secret-tok"}"#;

        assert!(flow.resolve(SetupTrigger::push(raw)).await.is_err());
        assert!(logs_contain("Call setup rejected"));
        assert!(!logs_contain("secret-tok"));
    }
}
