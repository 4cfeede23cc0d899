//! Inbound envelope dispatch.
//!
//! A linear pipeline per envelope: resolve protocol, resolve handlers,
//! decode, invoke. Dispatch faults go to the [`ErrorHandler`] and end the
//! envelope's journey quietly. Only a handler error the exception policy
//! declares fatal comes back to the caller.

use std::sync::Arc;

use kairos_types::{Envelope, Payload};
use tracing::trace;

use crate::error_handler::ErrorHandler;
use crate::filter::Filter;
use crate::policy::{ExecutionControl, ExecutionError};
use crate::protocol::ProtocolRegistry;

pub struct EnvelopeDispatcher {
    protocols: Arc<dyn ProtocolRegistry>,
    filter: Arc<Filter>,
    error_handler: Arc<ErrorHandler>,
    control: Arc<ExecutionControl>,
}

impl EnvelopeDispatcher {
    pub fn new(
        protocols: Arc<dyn ProtocolRegistry>,
        filter: Arc<Filter>,
        error_handler: Arc<ErrorHandler>,
        control: Arc<ExecutionControl>,
    ) -> Self {
        Self {
            protocols,
            filter,
            error_handler,
            control,
        }
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    /// Dispatch one envelope to every active handler of its protocol.
    ///
    /// Every handler is invoked even if an earlier one failed; the first
    /// fatal outcome is returned once all of them ran.
    pub fn dispatch(&self, envelope: Envelope) -> Result<(), ExecutionError> {
        let protocol_id = envelope.protocol_specification_id.as_str();

        let Some(protocol) = self.protocols.resolve_by_specification_id(protocol_id) else {
            self.error_handler.unsupported_protocol(&envelope);
            return Ok(());
        };

        let handlers = self
            .filter
            .active_handlers(protocol_id, envelope.skill_id.as_ref());
        if handlers.is_empty() {
            let reason = match &envelope.skill_id {
                Some(skill) => format!("no active handler for protocol {protocol_id} in skill {skill}"),
                None => format!("no active handler for protocol {protocol_id}"),
            };
            self.error_handler.no_active_handler(&envelope, &reason);
            return Ok(());
        }

        let decoded = match &envelope.message {
            Payload::Decoded(message) => Ok(message.clone()),
            Payload::Raw(bytes) => protocol.decode(bytes),
        };
        let mut message = match decoded {
            Ok(message) => message,
            Err(e) => {
                self.error_handler.decoding_error(&envelope, &e);
                return Ok(());
            }
        };
        message.sender = envelope.sender;
        message.to = envelope.to;

        let mut first_fatal = None;
        for (id, handler) in handlers {
            trace!(component = %id, performative = %message.performative, "handling message");
            let outcome = self
                .control
                .execute(&id.to_string(), || handler.lock().handle(&message));
            if let Err(e) = outcome {
                first_fatal.get_or_insert(e);
            }
        }
        match first_fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EnvelopeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeDispatcher")
            .field("error_handler", &self.error_handler)
            .field("control", &self.control)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonProtocol, StaticProtocolRegistry};
    use crate::registry::ComponentRegistry;
    use crate::skill::FnHandler;
    use crate::skill::SkillContext;
    use kairos_types::{ExceptionPolicy, Message, SkillId};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PING: &str = "acme/ping:0.1.0";

    struct Fixture {
        dispatcher: EnvelopeDispatcher,
        registry: Arc<ComponentRegistry>,
        errors: Arc<ErrorHandler>,
    }

    fn fixture(policy: ExceptionPolicy, skills: &[&str]) -> Fixture {
        let registry = Arc::new(ComponentRegistry::new());
        for s in skills {
            let id: SkillId = s.parse().unwrap();
            registry.register_skill(Arc::new(SkillContext::new(id))).unwrap();
        }
        let control = Arc::new(ExecutionControl::new(policy, None));
        let filter = Arc::new(Filter::new(Arc::clone(&registry), Arc::clone(&control)));
        let errors = Arc::new(ErrorHandler::new());
        let protocols = Arc::new(StaticProtocolRegistry::new().with(JsonProtocol::new(PING)));
        Fixture {
            dispatcher: EnvelopeDispatcher::new(protocols, filter, Arc::clone(&errors), control),
            registry,
            errors,
        }
    }

    fn ping() -> Envelope {
        Envelope::raw("me", "alice", PING, JsonProtocol::encode("ping", &json!({"n": 7})))
    }

    #[test]
    fn unknown_protocol_counts_once() {
        let f = fixture(ExceptionPolicy::Propagate, &[]);
        let envelope = Envelope::raw("me", "alice", "acme/unknown:1.0.0", b"{}".to_vec());
        f.dispatcher.dispatch(envelope).unwrap();
        assert_eq!(f.errors.unsupported_protocol_count(), 1);
        assert_eq!(f.errors.no_active_handler_count(), 0);
    }

    #[test]
    fn known_protocol_without_handlers_counts_once() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a"]);
        f.dispatcher.dispatch(ping()).unwrap();
        assert_eq!(f.errors.no_active_handler_count(), 1);
        assert_eq!(f.errors.unsupported_protocol_count(), 0);
    }

    #[test]
    fn decode_failure_counts_and_does_not_raise() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a"]);
        f.registry
            .register_handler(&"acme/a".parse().unwrap(), Box::new(FnHandler::new("h", PING, |_| Ok(()))))
            .unwrap();
        let envelope = Envelope::raw("me", "alice", PING, b"not json".to_vec());
        f.dispatcher.dispatch(envelope).unwrap();
        assert_eq!(f.errors.decoding_error_count(), 1);
    }

    #[test]
    fn decoded_message_is_stamped_with_envelope_addressing() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a"]);
        let seen = Arc::new(Mutex::new(None::<Message>));
        let slot = Arc::clone(&seen);
        f.registry
            .register_handler(
                &"acme/a".parse().unwrap(),
                Box::new(FnHandler::new("h", PING, move |m| {
                    *slot.lock() = Some(m.clone());
                    Ok(())
                })),
            )
            .unwrap();

        f.dispatcher.dispatch(ping()).unwrap();

        let message = seen.lock().clone().unwrap();
        assert_eq!(message.sender, "alice");
        assert_eq!(message.to, "me");
        assert_eq!(message.performative, "ping");
        assert_eq!(message.body["n"], 7);
    }

    #[test]
    fn pre_decoded_payload_skips_decoder() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a"]);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        f.registry
            .register_handler(
                &"acme/a".parse().unwrap(),
                Box::new(FnHandler::new("h", PING, move |m| {
                    assert_eq!(m.performative, "pong");
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
        let message = Message::new(PING, "pong", json!(null)).addressed("bob", "me");
        f.dispatcher.dispatch(Envelope::decoded(message)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(f.errors.decoding_error_count(), 0);
    }

    #[test]
    fn skill_scoped_envelope_reaches_only_that_skill() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a", "acme/b"]);
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        for (skill, hits) in [("acme/a", &hits_a), ("acme/b", &hits_b)] {
            let hits = Arc::clone(hits);
            f.registry
                .register_handler(
                    &skill.parse().unwrap(),
                    Box::new(FnHandler::new("h", PING, move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                )
                .unwrap();
        }

        f.dispatcher.dispatch(ping()).unwrap();
        f.dispatcher
            .dispatch(ping().for_skill("acme/b".parse().unwrap()))
            .unwrap();
        f.dispatcher
            .dispatch(ping().for_skill("acme/zzz".parse().unwrap()))
            .unwrap();

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 2);
        assert_eq!(f.errors.no_active_handler_count(), 1);
    }

    #[test]
    fn failing_handler_does_not_starve_the_rest() {
        let f = fixture(ExceptionPolicy::Propagate, &["acme/a", "acme/b"]);
        f.registry
            .register_handler(
                &"acme/a".parse().unwrap(),
                Box::new(FnHandler::new("h", PING, |_| Err(anyhow::anyhow!("first broke")))),
            )
            .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        f.registry
            .register_handler(
                &"acme/b".parse().unwrap(),
                Box::new(FnHandler::new("h", PING, move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();

        let err = f.dispatcher.dispatch(ping()).unwrap_err();
        assert_eq!(err.original().to_string(), "first broke");
        assert_eq!(err.origin(), "acme/a:h");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn just_log_swallows_handler_errors() {
        let f = fixture(ExceptionPolicy::JustLog, &["acme/a"]);
        f.registry
            .register_handler(
                &"acme/a".parse().unwrap(),
                Box::new(FnHandler::new("h", PING, |_| Err(anyhow::anyhow!("always")))),
            )
            .unwrap();
        for _ in 0..3 {
            f.dispatcher.dispatch(ping()).unwrap();
        }
    }
}
