//! The agent: composes registry, filter, dispatcher, error handler and
//! execution control, and drives one of the loop strategies.
//!
//! ```no_run
//! # use kairos_core::{Agent, Skill, CyclicBehaviour};
//! # use kairos_types::AgentConfig;
//! # async fn demo() -> Result<(), kairos_core::AgentError> {
//! let skill = Skill::new("acme/heartbeat".parse()?)
//!     .behaviour(CyclicBehaviour::new("beat", || Ok(())));
//! let agent = Agent::builder(AgentConfig::named("alice")).skill(skill).build()?;
//! agent.run().await
//! # }
//! ```

pub mod context;

use std::sync::Arc;

use kairos_types::{AgentConfig, AgentLoopState, ComponentId, ConfigError, Envelope, LoopMode, RegistryError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{Instrument, Span, error, info, info_span};

pub use context::AgentContext;

use crate::agent_loop::{AsyncAgentLoop, LoopError, LoopState, SyncAgentLoop};
use crate::dispatcher::EnvelopeDispatcher;
use crate::error_handler::ErrorHandler;
use crate::filter::Filter;
use crate::policy::{ExecutionControl, ExecutionError};
use crate::protocol::{ProtocolRegistry, StaticProtocolRegistry};
use crate::queue::{BridgingQueue, EnvelopeSink};
use crate::registry::ComponentRegistry;
use crate::skill::Skill;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("setup of `{component}` failed: {source}")]
    Setup {
        component: ComponentId,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("failed to spawn the agent loop thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("agent loop thread exited without reporting a result")]
    ThreadJoin,
}

impl AgentError {
    /// The fatal skill error that ended the run, if that is what happened.
    pub fn execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Loop(LoopError::Execution(e)) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct AgentBuilder {
    config: AgentConfig,
    skills: Vec<Skill>,
    protocols: Option<Arc<dyn ProtocolRegistry>>,
    inbox: Option<Arc<BridgingQueue<Envelope>>>,
    outbox: Option<Arc<dyn EnvelopeSink>>,
}

impl AgentBuilder {
    pub fn skill(mut self, skill: Skill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn protocols(mut self, protocols: Arc<dyn ProtocolRegistry>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    /// Use an inbox owned by the transport layer.
    pub fn inbox(mut self, inbox: Arc<BridgingQueue<Envelope>>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Sink for envelopes the agent emits (error replies, `AgentContext::send`).
    pub fn outbox(mut self, outbox: Arc<dyn EnvelopeSink>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let config = self.config;
        config.validate()?;

        let control = Arc::new(ExecutionControl::new(config.exception_policy, config.execution_timeout()));
        let registry = Arc::new(ComponentRegistry::new());
        let internal_queue = Arc::new(BridgingQueue::new());

        for skill in self.skills {
            let (context, behaviours, handlers) = skill.into_parts();
            context.attach_internal_queue(Arc::clone(&internal_queue));
            registry.register_skill(Arc::clone(&context))?;
            for behaviour in behaviours {
                registry.register_behaviour(context.skill_id(), behaviour)?;
            }
            for handler in handlers {
                registry.register_handler(context.skill_id(), handler)?;
            }
        }

        let outbox: Arc<dyn EnvelopeSink> = match self.outbox {
            Some(outbox) => outbox,
            None => Arc::new(BridgingQueue::<Envelope>::new()),
        };
        let error_handler = Arc::new(if config.error_replies {
            ErrorHandler::with_replies(config.address(), Arc::clone(&outbox))
        } else {
            ErrorHandler::new()
        });
        let protocols: Arc<dyn ProtocolRegistry> = match self.protocols {
            Some(protocols) => protocols,
            None => Arc::new(StaticProtocolRegistry::new()),
        };

        let filter = Arc::new(Filter::new(Arc::clone(&registry), Arc::clone(&control)));
        let dispatcher = EnvelopeDispatcher::new(
            protocols,
            Arc::clone(&filter),
            Arc::clone(&error_handler),
            Arc::clone(&control),
        );

        let context = AgentContext {
            config,
            registry,
            filter,
            dispatcher,
            control,
            error_handler,
            inbox: self.inbox.unwrap_or_default(),
            internal_queue,
            outbox,
        };
        Ok(Agent {
            context: Arc::new(context),
            state: Arc::new(LoopState::new()),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    context: Arc<AgentContext>,
    state: Arc<LoopState>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            skills: Vec::new(),
            protocols: None,
            inbox: None,
            outbox: None,
        }
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    pub fn state(&self) -> AgentLoopState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Request a cooperative shutdown. Safe from any thread.
    pub fn stop(&self) {
        self.state.request_stop();
    }

    pub fn inbox(&self) -> &Arc<BridgingQueue<Envelope>> {
        self.context.inbox()
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        self.context.error_handler()
    }

    /// Set up every component, run the configured loop, tear everything down.
    ///
    /// Teardown happens on every exit path, including a failed setup, and
    /// reaches only the components whose `setup` succeeded.
    pub async fn run(&self) -> Result<(), AgentError> {
        let span = info_span!("agent", name = %self.context.name());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<(), AgentError> {
        let state = self.state.get();
        if !matches!(state, AgentLoopState::Initial | AgentLoopState::Stopping) {
            return Err(LoopError::AlreadyStarted(state).into());
        }

        if let Err((component, source)) = self.context.setup() {
            error!(%component, error = %source, "component setup failed");
            self.context.teardown();
            return Err(AgentError::Setup { component, source });
        }
        let mode = self.context.config().loop_mode;
        info!(?mode, policy = %self.context.config().exception_policy, "agent starting");

        let result = match mode {
            LoopMode::Cooperative => AsyncAgentLoop::new(Arc::clone(&self.context), Arc::clone(&self.state))
                .run()
                .await
                .map_err(AgentError::from),
            LoopMode::Blocking => self.run_blocking().await,
        };

        self.context.teardown();
        match &result {
            Ok(()) => info!("agent stopped"),
            Err(e) => error!(error = %e, "agent stopped with error"),
        }
        result
    }

    async fn run_blocking(&self) -> Result<(), AgentError> {
        let agent_loop = SyncAgentLoop::new(Arc::clone(&self.context), Arc::clone(&self.state));
        let (tx, rx) = oneshot::channel();
        let span = Span::current();
        std::thread::Builder::new()
            .name(format!("kairos-{}", self.context.name()))
            .spawn(move || {
                let result = span.in_scope(|| agent_loop.run());
                // The receiver only goes away if `run` itself was dropped.
                let _ = tx.send(result);
            })
            .map_err(AgentError::ThreadSpawn)?;

        rx.await.map_err(|_| AgentError::ThreadJoin)?.map_err(AgentError::from)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.context.name())
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::codes;
    use crate::protocol::JsonProtocol;
    use crate::skill::{Behaviour, CyclicBehaviour, FnHandler};
    use kairos_types::message::DEFAULT_PROTOCOL_ID;
    use kairos_types::{ExceptionPolicy, Payload};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PING: &str = "acme/ping:0.1.0";

    fn ping() -> Envelope {
        Envelope::raw("alice", "bob", PING, JsonProtocol::encode("ping", &json!({})))
    }

    fn protocols() -> Arc<StaticProtocolRegistry> {
        Arc::new(StaticProtocolRegistry::new().with(JsonProtocol::new(PING)))
    }

    struct Lifecycle {
        name: &'static str,
        setups: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        fail_setup: bool,
    }

    impl Behaviour for Lifecycle {
        fn name(&self) -> &str {
            self.name
        }
        fn setup(&mut self) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                anyhow::bail!("missing credentials");
            }
            Ok(())
        }
        fn act(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn teardown(&mut self) -> anyhow::Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn lifecycle(name: &'static str, fail_setup: bool) -> (Lifecycle, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let setups = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        (
            Lifecycle {
                name,
                setups: Arc::clone(&setups),
                teardowns: Arc::clone(&teardowns),
                fail_setup,
            },
            setups,
            teardowns,
        )
    }

    #[test]
    fn duplicate_skill_fails_build() {
        let err = Agent::builder(AgentConfig::named("a"))
            .skill(Skill::new("acme/x".parse().unwrap()))
            .skill(Skill::new("acme/x".parse().unwrap()))
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentError::Registry(RegistryError::SkillAlreadyRegistered(_))));
    }

    #[test]
    fn invalid_config_fails_build() {
        let config = AgentConfig {
            max_reactions: 0,
            ..AgentConfig::named("a")
        };
        let err = Agent::builder(config).build().unwrap_err();
        assert!(matches!(err, AgentError::Config(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn run_sets_up_and_tears_down() {
        let (behaviour, setups, teardowns) = lifecycle("lifecycle", false);
        let agent = Arc::new(
            Agent::builder(AgentConfig::named("a"))
                .skill(Skill::new("acme/x".parse().unwrap()).behaviour(behaviour))
                .build()
                .unwrap(),
        );
        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(agent.is_running());
        agent.stop();
        runner.await.unwrap().unwrap();

        assert_eq!(agent.state(), AgentLoopState::Stopped);
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_setup_is_fatal_and_tears_down_what_was_set_up() {
        let (ready, _, ready_teardowns) = lifecycle("a_ready", false);
        let (broken, _, broken_teardowns) = lifecycle("b_broken", true);
        let (pending, pending_setups, pending_teardowns) = lifecycle("c_pending", false);
        let skill = Skill::new("acme/x".parse().unwrap())
            .behaviour(ready)
            .behaviour(broken)
            .behaviour(pending);
        let agent = Agent::builder(AgentConfig::named("a")).skill(skill).build().unwrap();

        let err = agent.run().await.unwrap_err();
        let AgentError::Setup { component, source } = err else {
            panic!("expected setup error");
        };
        assert_eq!(component.to_string(), "acme/x:b_broken");
        assert_eq!(source.to_string(), "missing credentials");
        assert_eq!(ready_teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(broken_teardowns.load(Ordering::SeqCst), 0);
        assert_eq!(pending_setups.load(Ordering::SeqCst), 0);
        assert_eq!(pending_teardowns.load(Ordering::SeqCst), 0);
        assert_eq!(agent.state(), AgentLoopState::Initial);
    }

    #[tokio::test]
    async fn stop_before_run_returns_immediately() {
        let agent = Agent::builder(AgentConfig::named("a")).build().unwrap();
        agent.stop();
        tokio::time::timeout(Duration::from_secs(1), agent.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.state(), AgentLoopState::Stopped);
        assert!(matches!(
            agent.run().await,
            Err(AgentError::Loop(LoopError::AlreadyStarted(AgentLoopState::Stopped)))
        ));
    }

    #[tokio::test]
    async fn blocking_mode_runs_on_its_own_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let thread_name = Arc::new(parking_lot::Mutex::new(None::<String>));
        let (c, t) = (Arc::clone(&count), Arc::clone(&thread_name));
        let skill = Skill::new("acme/x".parse().unwrap()).behaviour(CyclicBehaviour::new("b", move || {
            c.fetch_add(1, Ordering::SeqCst);
            *t.lock() = std::thread::current().name().map(str::to_string);
            Ok(())
        }));
        let config = AgentConfig {
            loop_mode: LoopMode::Blocking,
            period_secs: 0.01,
            ..AgentConfig::named("spinner")
        };
        let agent = Arc::new(Agent::builder(config).skill(skill).build().unwrap());
        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        agent.stop();
        runner.await.unwrap().unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(thread_name.lock().as_deref(), Some("kairos-spinner"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_and_exit_error_is_reachable_from_agent_error() {
        let skill = Skill::new("acme/x".parse().unwrap()).handler(FnHandler::new("h", PING, |_| {
            anyhow::bail!("ledger unreachable")
        }));
        let config = AgentConfig {
            exception_policy: ExceptionPolicy::StopAndExit,
            ..AgentConfig::named("a")
        };
        let agent = Agent::builder(config)
            .skill(skill)
            .protocols(protocols())
            .build()
            .unwrap();
        agent.inbox().put(ping());

        let err = tokio::time::timeout(Duration::from_secs(2), agent.run())
            .await
            .unwrap()
            .unwrap_err();
        let execution = err.execution().unwrap();
        assert!(execution.is_stop_runtime());
        assert_eq!(execution.original().to_string(), "ledger unreachable");
        assert_eq!(execution.origin(), "acme/x:h");
        assert!(!agent.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatch_faults_are_counted_while_running() {
        let agent = Arc::new(
            Agent::builder(AgentConfig::named("a"))
                .skill(Skill::new("acme/x".parse().unwrap()))
                .protocols(protocols())
                .build()
                .unwrap(),
        );
        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run().await })
        };

        agent.inbox().put(Envelope::raw("a", "bob", "acme/unknown:1.0.0", Vec::new()));
        agent.inbox().put(ping());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(agent.error_handler().unsupported_protocol_count(), 1);
        assert_eq!(agent.error_handler().no_active_handler_count(), 1);
        assert!(agent.is_running());

        agent.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn error_replies_go_to_outbox() {
        let outbox = Arc::new(BridgingQueue::<Envelope>::new());
        let config = AgentConfig {
            error_replies: true,
            address: Some("agent-addr".into()),
            ..AgentConfig::named("a")
        };
        let agent = Agent::builder(config)
            .protocols(protocols())
            .outbox(outbox.clone())
            .build()
            .unwrap();

        agent.context().react_one(ping()).unwrap();

        let reply = outbox.get_nowait().unwrap();
        assert_eq!(reply.protocol_specification_id, DEFAULT_PROTOCOL_ID);
        assert_eq!(reply.sender, "agent-addr");
        assert_eq!(reply.to, "bob");
        let Payload::Decoded(message) = reply.message else {
            panic!("expected decoded error message");
        };
        assert_eq!(message.body["error_code"], codes::UNSUPPORTED_SKILL);
    }

    #[test]
    fn send_to_skill_rejects_unaddressed_messages() {
        let agent = Agent::builder(AgentConfig::named("a")).build().unwrap();
        let message = kairos_types::Message::new("p", "inform", json!({}));
        assert!(agent.context().send_to_skill(message).is_err());
        assert!(agent.context().internal_queue().is_empty());
    }
}
