//! Mesh router core.
//!
//! Resolves a destination for each message and delivers it through the
//! discovery port. Resolution order:
//!
//! 1. direct route for `(sender, receiver)`
//! 2. intent resolver named by `metadata.intent`
//! 3. explicit `receiver_id`
//! 4. broadcast to every component of `metadata.target_type`
//!
//! Every failure becomes a structured `error` message; nothing escapes as a
//! panic or an `Err` to the caller.
//!
//! The algorithm is written once as async code. [`MeshRouter::send`] runs it
//! cooperatively, [`MeshRouter::send_blocking`] drives the same future on
//! the calling thread, and the queue processor runs it on a tokio task.

use crate::core::{Error, ErrorCode, Result, RouterConfig};
use crate::mcp::compression::{Codec, CodecRegistry};
use crate::mcp::control::ControlRequest;
use crate::mcp::discovery::{Component, ComponentOutput, DiscoveryPort};
use crate::mcp::handlers::{Handler, HandlerRegistry};
use crate::mcp::intent::{IntentRegistry, IntentResolver};
use crate::mcp::message::{default_validator, Message, MessageType};
use crate::mcp::queue::{QueueConsumer, QueueProcessor};
use crate::mcp::routes::{Route, RouteTable};
use crate::monitoring::logging::{LogEntry, LogLevel, Logger};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Validity check applied before a message is routed.
pub type Validator = Arc<dyn Fn(&Message) -> std::result::Result<(), String> + Send + Sync>;

/// Outcome of [`MeshRouter::send`].
#[derive(Clone, Debug, PartialEq)]
pub enum Routed {
    /// A response or error from a single delivery
    Single(Message),
    /// One entry per broadcast target, in discovery order
    Broadcast(Vec<Message>),
}

impl Routed {
    /// The single reply, if this was not a broadcast.
    pub fn into_single(self) -> Option<Message> {
        match self {
            Routed::Single(message) => Some(message),
            Routed::Broadcast(_) => None,
        }
    }

    /// All replies as a list.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Routed::Single(message) => vec![message],
            Routed::Broadcast(messages) => messages,
        }
    }

    /// Error code of a single error reply.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Routed::Single(message) => message.error_code(),
            Routed::Broadcast(_) => None,
        }
    }
}

/// Router metrics for monitoring.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterMetrics {
    pub total_routes: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    pub broadcasts: u64,
}

#[derive(Default)]
struct MetricCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    broadcasts: AtomicU64,
}

impl MetricCounters {
    fn record(&self, routed: &Routed) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match routed {
            Routed::Single(reply) if reply.is_error() => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Routed::Single(_) => {
                self.successful.fetch_add(1, Ordering::Relaxed);
            }
            Routed::Broadcast(replies) => {
                self.broadcasts.fetch_add(1, Ordering::Relaxed);
                if !replies.is_empty() && replies.iter().all(Message::is_error) {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.successful.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn snapshot(&self) -> RouterMetrics {
        RouterMetrics {
            total_routes: self.total.load(Ordering::Relaxed),
            successful_routes: self.successful.load(Ordering::Relaxed),
            failed_routes: self.failed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot returned by the `status` query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterStatus {
    pub router_id: String,
    pub running: bool,
    pub queue_depth: usize,
    pub processed_count: u64,
    pub route_count: usize,
    pub handler_count: usize,
    pub intent_count: usize,
    pub codec_count: usize,
    pub metrics: RouterMetrics,
}

/// Builder for [`MeshRouter`].
pub struct RouterBuilder {
    config: RouterConfig,
    discovery: Option<Arc<dyn DiscoveryPort>>,
    logger: Option<Arc<Logger>>,
    validator: Option<Validator>,
}

impl RouterBuilder {
    /// Attach a discovery port.
    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryPort>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Inject a logger. By default each router gets its own.
    pub fn logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replace the default validity check.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Message) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Build the router.
    pub fn build(self) -> Arc<MeshRouter> {
        let logger = self.logger.unwrap_or_else(|| {
            Arc::new(Logger::new(
                &self.config.router_id,
                self.config.logging.clone(),
            ))
        });
        let validator: Validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(default_validator),
        };

        Arc::new_cyclic(|this| MeshRouter {
            this: this.clone(),
            queue: QueueProcessor::new(Arc::clone(&logger)),
            config: self.config,
            routes: RwLock::new(RouteTable::new()),
            handlers: RwLock::new(HandlerRegistry::new()),
            intents: RwLock::new(IntentRegistry::new()),
            codecs: RwLock::new(CodecRegistry::new()),
            discovery: self.discovery,
            validator,
            logger,
            metrics: MetricCounters::default(),
        })
    }
}

/// The mesh router.
///
/// Owns its route table and registries; shares the discovery port.
pub struct MeshRouter {
    this: Weak<MeshRouter>,
    config: RouterConfig,
    routes: RwLock<RouteTable>,
    handlers: RwLock<HandlerRegistry>,
    intents: RwLock<IntentRegistry>,
    codecs: RwLock<CodecRegistry>,
    discovery: Option<Arc<dyn DiscoveryPort>>,
    validator: Validator,
    logger: Arc<Logger>,
    queue: QueueProcessor,
    metrics: MetricCounters,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "component panicked".to_string()
    }
}

impl MeshRouter {
    /// Start building a router.
    pub fn builder(config: RouterConfig) -> RouterBuilder {
        RouterBuilder {
            config,
            discovery: None,
            logger: None,
            validator: None,
        }
    }

    /// Create a router without a discovery port.
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    /// Create a router with a discovery port.
    pub fn with_discovery(config: RouterConfig, discovery: Arc<dyn DiscoveryPort>) -> Arc<Self> {
        Self::builder(config).discovery(discovery).build()
    }

    /// Router identity.
    pub fn id(&self) -> &str {
        &self.config.router_id
    }

    /// Injected logger.
    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Insert or overwrite a direct route.
    pub fn add_route(
        &self,
        source: &str,
        destination: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Route {
        let route = write(&self.routes).add(source, destination, metadata.unwrap_or_default());
        self.logger.log(
            LogEntry::new(LogLevel::Debug, "Route added")
                .with_field("source", source)
                .with_field("destination", destination),
        );
        route
    }

    /// Look up a direct route.
    pub fn get_route(&self, source: &str, destination: &str) -> Option<Route> {
        read(&self.routes).get(source, destination).cloned()
    }

    /// Remove a direct route.
    pub fn remove_route(&self, source: &str, destination: &str) -> Option<Route> {
        write(&self.routes).remove(source, destination)
    }

    /// Full route table, ordered by `(source, destination)`.
    pub fn routes(&self) -> Vec<Route> {
        read(&self.routes).all()
    }

    /// Register a handler for a message kind, replacing any previous one.
    pub fn register_handler<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        write(&self.handlers).register(message_type, handler);
    }

    /// Remove the handler for a message kind.
    pub fn unregister_handler(&self, message_type: MessageType) -> bool {
        write(&self.handlers).unregister(message_type).is_some()
    }

    /// Register an intent resolver, replacing any previous one.
    pub fn register_intent<F>(&self, intent: &str, resolver: F)
    where
        F: Fn(&Message) -> Option<String> + Send + Sync + 'static,
    {
        self.register_intent_resolver(intent, Arc::new(resolver));
    }

    /// Register a shared intent resolver.
    pub fn register_intent_resolver(&self, intent: &str, resolver: IntentResolver) {
        write(&self.intents).register(intent, resolver);
    }

    /// Remove an intent resolver.
    pub fn unregister_intent(&self, intent: &str) -> bool {
        write(&self.intents).unregister(intent).is_some()
    }

    /// Register a codec for a content type from its two directions.
    pub fn register_codec<C, D>(&self, content_type: &str, compress: C, decompress: D)
    where
        C: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_codec_pair(
            content_type,
            Codec::new(Arc::new(compress), Arc::new(decompress)),
        );
    }

    /// Register a prebuilt codec for a content type.
    pub fn register_codec_pair(&self, content_type: &str, codec: Codec) {
        write(&self.codecs).register(content_type, codec);
    }

    /// Remove the codec for a content type.
    pub fn unregister_codec(&self, content_type: &str) -> bool {
        write(&self.codecs).unregister(content_type).is_some()
    }

    /// Route a message.
    pub async fn send(&self, message: Message) -> Routed {
        let routed = self.route(message).await;
        self.metrics.record(&routed);
        routed
    }

    /// Route a message on the calling thread.
    ///
    /// Blocks until delivery finishes; there is no timeout.
    pub fn send_blocking(&self, message: Message) -> Routed {
        futures::executor::block_on(self.send(message))
    }

    async fn route(&self, mut message: Message) -> Routed {
        if let Err(reason) = (self.validator)(&message) {
            return Routed::Single(self.fail(&message, Error::InvalidMessage(reason)));
        }
        if let Some(limit) = self.config.max_hops {
            if message.hop_path.len() >= limit {
                let err = Error::HopLimitExceeded {
                    message_id: message.message_id.clone(),
                    limit,
                };
                return Routed::Single(self.fail(&message, err));
            }
        }
        message.push_hop(self.id());

        if message.receiver_id.as_deref() == Some(self.id()) {
            return Routed::Single(self.handle_control(message));
        }

        if let Some(receiver) = message.receiver_id.as_deref() {
            if read(&self.routes).contains(&message.sender_id, receiver) {
                self.trace(&message, "direct route");
                return Routed::Single(self.deliver(message).await);
            }
        }

        let resolver = message
            .intent()
            .and_then(|intent| read(&self.intents).get(intent));
        if let Some(resolver) = resolver {
            if let Some(destination) = resolver(&message) {
                self.trace(&message, "intent resolved");
                message.receiver_id = Some(destination);
                return Routed::Single(self.deliver(message).await);
            }
        }

        if message.receiver_id.is_some() {
            self.trace(&message, "explicit receiver");
            return Routed::Single(self.deliver(message).await);
        }

        if let Some(target_type) = message.target_type().map(str::to_string) {
            self.trace(&message, "broadcast");
            return Routed::Broadcast(self.broadcast(message, &target_type).await);
        }

        let err = Error::NoRoute(message.message_id.clone());
        Routed::Single(self.fail(&message, err))
    }

    /// Deliver a message to its receiver.
    pub async fn deliver(&self, message: Message) -> Message {
        let original = message.clone();
        match self.try_deliver(message).await {
            Ok(reply) => reply,
            Err(err) => self.fail(&original, err),
        }
    }

    async fn try_deliver(&self, mut message: Message) -> Result<Message> {
        let receiver = message
            .receiver_id
            .clone()
            .ok_or_else(|| Error::MissingReceiver(message.message_id.clone()))?;

        let codec = message
            .content_type()
            .and_then(|content_type| read(&self.codecs).get(content_type));
        if let Some(codec) = &codec {
            if !message.is_compressed() {
                message.payload = codec.compress(&message.payload)?;
                message.set_compressed(true);
            }
        }

        let discovery = self.discovery.as_ref().ok_or(Error::NoDiscoveryService)?;
        let component = discovery
            .get_component(&receiver)
            .ok_or_else(|| Error::ComponentNotFound(receiver.clone()))?;

        if message.is_compressed() {
            if let Some(codec) = &codec {
                message.payload = codec.decompress(&message.payload)?;
                message.set_compressed(false);
            }
        }

        let original = message.clone();
        match invoke(component, message).await? {
            ComponentOutput::Message(reply) => Ok(reply),
            ComponentOutput::Value(value) => Ok(Message::response(&original, &receiver, value)),
        }
    }

    /// Deliver a clone of `message` to every component of `target_type`.
    ///
    /// Targets are served one after another; a slow target delays the rest.
    pub async fn broadcast(&self, message: Message, target_type: &str) -> Vec<Message> {
        let Some(discovery) = self.discovery.as_ref() else {
            return vec![self.fail(&message, Error::NoDiscoveryService)];
        };

        let targets = discovery.find_components_by_type(target_type);
        let mut replies = Vec::with_capacity(targets.len());
        for target in targets {
            let mut copy = message.clone();
            copy.receiver_id = Some(target.id().to_string());
            replies.push(self.deliver(copy).await);
        }
        replies
    }

    fn fail(&self, original: &Message, err: Error) -> Message {
        self.logger.log(
            LogEntry::new(LogLevel::Warn, "Routing failed")
                .with_message(&original.message_id)
                .with_field("code", err.code())
                .with_field("error", err.to_string()),
        );
        Message::from_error(original, self.id(), &err)
    }

    fn trace(&self, message: &Message, decision: &str) {
        self.logger.log(
            LogEntry::new(LogLevel::Debug, "Routing decision")
                .with_message(&message.message_id)
                .with_field("decision", decision)
                .with_field("receiver", &message.receiver_id),
        );
    }

    fn handle_control(&self, message: Message) -> Message {
        let outcome = ControlRequest::parse(&message).and_then(|request| self.execute(request));
        match outcome {
            Ok(payload) => Message::response(&message, self.id(), payload),
            Err(err) => self.fail(&message, err),
        }
    }

    fn execute(&self, request: ControlRequest) -> Result<Value> {
        match request {
            ControlRequest::GetRoutes | ControlRequest::Routes => {
                Ok(json!({ "routes": serde_json::to_value(self.routes())? }))
            }
            ControlRequest::AddRoute {
                source,
                destination,
                metadata,
            } => {
                let route = self.add_route(&source, &destination, Some(metadata));
                Ok(json!({ "status": "success", "route": serde_json::to_value(route)? }))
            }
            ControlRequest::Start => {
                let changed = self.start()?;
                Ok(json!({ "status": "running", "changed": changed }))
            }
            ControlRequest::Stop => {
                let changed = self.stop();
                Ok(json!({ "status": "stopped", "changed": changed }))
            }
            ControlRequest::Status => Ok(serde_json::to_value(self.status())?),
        }
    }

    /// Current router status.
    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            router_id: self.id().to_string(),
            running: self.queue.is_running(),
            queue_depth: self.queue.depth(),
            processed_count: self.queue.processed_count(),
            route_count: read(&self.routes).len(),
            handler_count: read(&self.handlers).len(),
            intent_count: read(&self.intents).len(),
            codec_count: read(&self.codecs).len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Routing metrics.
    pub fn metrics(&self) -> RouterMetrics {
        self.metrics.snapshot()
    }

    /// Dispatch a typed message through the handler registry.
    ///
    /// Kinds without a registered handler are routed with [`MeshRouter::send`].
    pub async fn dispatch(&self, message: Message) -> Message {
        let handler = read(&self.handlers).get(message.message_type);
        match handler {
            Some(handler) => match handler(&message) {
                Ok(Some(reply)) => reply,
                Ok(None) => Message::response(&message, self.id(), json!({ "status": "processed" })),
                Err(err) => self.fail(&message, Error::HandlerFailed(err.to_string())),
            },
            None => {
                let original = message.clone();
                match self.send(message).await {
                    Routed::Single(reply) => reply,
                    Routed::Broadcast(replies) => match serde_json::to_value(&replies) {
                        Ok(results) => {
                            Message::response(&original, self.id(), json!({ "results": results }))
                        }
                        Err(err) => self.fail(&original, err.into()),
                    },
                }
            }
        }
    }

    /// Platform ingress: decode, dispatch and encode one raw message.
    pub async fn process_message(&self, raw: Value) -> Value {
        let reply = match decode_raw(&raw) {
            Ok(message) => self.dispatch(message).await,
            Err(err) => self.reject(&raw, err),
        };
        encode_raw(&reply)
    }

    /// Blocking variant of [`MeshRouter::process_message`].
    pub fn process_message_blocking(&self, raw: Value) -> Value {
        futures::executor::block_on(self.process_message(raw))
    }

    /// Ingress for raw JSON text.
    pub async fn process_json(&self, json: &str) -> String {
        let reply = match serde_json::from_str::<Value>(json) {
            Ok(raw) => self.process_message(raw).await,
            Err(err) => {
                let err = Error::InvalidMessage(err.to_string());
                encode_raw(&self.reject(&Value::Null, err))
            }
        };
        reply.to_string()
    }

    fn reject(&self, raw: &Value, err: Error) -> Message {
        let field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        match field("sender_id") {
            Some(sender_id) => {
                let mut header = Message::new(MessageType::Error, &sender_id);
                if let Some(message_id) = field("message_id") {
                    header.message_id = message_id;
                }
                self.fail(&header, err)
            }
            None => {
                self.logger.log(
                    LogEntry::new(LogLevel::Warn, "Rejected raw message")
                        .with_field("error", err.to_string()),
                );
                Message::detached_error(self.id(), err.code(), &err.to_string())
            }
        }
    }

    /// Queue a message for the background worker. Never blocks.
    pub fn enqueue(&self, message: Message) {
        self.queue.enqueue(message);
    }

    /// Start the background worker. Returns `Ok(false)` if already running.
    pub fn start(&self) -> Result<bool> {
        let consumer: Weak<dyn QueueConsumer> = self.this.clone();
        self.queue.start(consumer)
    }

    /// Stop the background worker. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        self.queue.stop()
    }

    /// Whether the background worker is running.
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// Messages waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Messages drained by the background worker.
    pub fn processed_count(&self) -> u64 {
        self.queue.processed_count()
    }
}

#[async_trait]
impl QueueConsumer for MeshRouter {
    async fn consume(&self, message: Message) -> Message {
        self.dispatch(message).await
    }
}

async fn invoke(component: Arc<dyn Component>, message: Message) -> Result<ComponentOutput> {
    let outcome = match component.as_async() {
        Some(async_component) => {
            AssertUnwindSafe(async_component.process_message_async(message))
                .catch_unwind()
                .await
        }
        None => std::panic::catch_unwind(AssertUnwindSafe(|| component.process_message(message))),
    };

    let failed = |reason: String| Error::ComponentFailed {
        component: component.id().to_string(),
        reason,
    };
    match outcome {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(failed(err.to_string())),
        Err(panic) => Err(failed(panic_reason(panic.as_ref()))),
    }
}

fn decode_raw(raw: &Value) -> Result<Message> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::InvalidMessage("expected a JSON object".to_string()))?;
    match object.get("message_type") {
        Some(Value::String(message_type)) => {
            message_type.parse::<MessageType>()?;
        }
        Some(other) => return Err(Error::UnsupportedMessageType(other.to_string())),
        None => return Err(Error::UnsupportedMessageType("<missing>".to_string())),
    }

    serde_json::from_value(raw.clone()).map_err(|e| Error::InvalidMessage(e.to_string()))
}

fn encode_raw(message: &Message) -> Value {
    serde_json::to_value(message).unwrap_or_else(|e| {
        json!({
            "message_type": "error",
            "payload": { "code": ErrorCode::ProcessingError, "message": e.to_string() },
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::compression::lz4_codec;
    use crate::mcp::discovery::{AsyncComponent, FnComponent, InMemoryDiscovery};
    use crate::mcp::intent::{Capability, CapabilityIndex};
    use crate::monitoring::logging::LoggerConfig;
    use std::sync::Mutex;
    use std::time::Duration;

    const ROUTER: &str = "router";

    fn config() -> RouterConfig {
        RouterConfig::new(ROUTER).with_logging(LoggerConfig {
            emit_tracing: false,
            level: LogLevel::Debug,
            ..LoggerConfig::default()
        })
    }

    /// Component that records every message it receives.
    struct Tracker {
        id: String,
        kind: String,
        seen: Mutex<Vec<Message>>,
    }

    impl Tracker {
        fn new(id: &str, kind: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                kind: kind.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Message> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Component for Tracker {
        fn id(&self) -> &str {
            &self.id
        }

        fn component_type(&self) -> &str {
            &self.kind
        }

        fn process_message(&self, message: Message) -> Result<ComponentOutput> {
            let payload = message.payload.clone();
            self.seen.lock().unwrap().push(message);
            Ok(json!({ "handled_by": self.id, "echo": payload }).into())
        }
    }

    /// Component with both variants; the async one tags its output.
    struct AsyncEcho;

    impl Component for AsyncEcho {
        fn id(&self) -> &str {
            "async"
        }

        fn component_type(&self) -> &str {
            "worker"
        }

        fn process_message(&self, _message: Message) -> Result<ComponentOutput> {
            Ok(json!("sync").into())
        }

        fn as_async(&self) -> Option<&dyn AsyncComponent> {
            Some(self)
        }
    }

    #[async_trait]
    impl AsyncComponent for AsyncEcho {
        async fn process_message_async(&self, _message: Message) -> Result<ComponentOutput> {
            tokio::task::yield_now().await;
            Ok(json!("async").into())
        }
    }

    fn setup(components: Vec<Arc<dyn Component>>) -> (Arc<MeshRouter>, Arc<InMemoryDiscovery>) {
        let discovery = Arc::new(InMemoryDiscovery::new());
        for component in components {
            discovery.register(component);
        }
        let router = MeshRouter::with_discovery(config(), discovery.clone());
        (router, discovery)
    }

    fn single(routed: Routed) -> Message {
        routed.into_single().expect("expected a single reply")
    }

    #[test]
    fn test_route_registration() {
        let router = MeshRouter::new(config());
        router.add_route("A", "B", None);

        assert!(router.get_route("A", "B").is_some());
        assert!(router.get_route("B", "A").is_none());

        let mut metadata = Map::new();
        metadata.insert("priority".to_string(), json!("high"));
        router.add_route("A", "B", Some(metadata));
        assert_eq!(router.routes().len(), 1);
        assert_eq!(router.get_route("A", "B").unwrap().metadata["priority"], json!("high"));

        assert!(router.remove_route("A", "B").is_some());
        assert!(router.routes().is_empty());
    }

    #[tokio::test]
    async fn test_direct_delivery_wraps_response() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);

        let request = Message::request("A", "B", json!({"op": "ping"}));
        let reply = single(router.send(request.clone()).await);

        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.sender_id, "B");
        assert_eq!(reply.receiver_id.as_deref(), Some("A"));
        assert_eq!(reply.request_id(), Some(request.message_id.as_str()));
        assert_eq!(reply.payload["handled_by"], json!("B"));
        assert_eq!(b.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_receiver() {
        let (router, _) = setup(vec![]);

        let request = Message::request("A", "unknown-id", Value::Null);
        let reply = single(router.send(request).await);

        assert_eq!(reply.error_code(), Some(ErrorCode::ComponentNotFound));
        assert_eq!(reply.receiver_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_broadcast_without_discovery() {
        let router = MeshRouter::new(config());

        let event = Message::new(MessageType::Event, "A").with_target_type("sensor");
        let replies = router.send(event).await.into_messages();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].error_code(), Some(ErrorCode::NoDiscoveryService));
    }

    #[tokio::test]
    async fn test_delivery_without_discovery() {
        let router = MeshRouter::new(config());
        let reply = single(router.send(Message::request("A", "B", Value::Null)).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::NoDiscoveryService));
    }

    #[tokio::test]
    async fn test_broadcast_completeness_and_order() {
        let sensors: Vec<_> = (0..4).map(|i| Tracker::new(&format!("s{}", i), "sensor")).collect();
        let mut components: Vec<Arc<dyn Component>> = Vec::new();
        for sensor in &sensors {
            components.push(sensor.clone());
        }
        components.push(Tracker::new("act", "actuator"));
        let (router, _) = setup(components);

        let event = Message::new(MessageType::Event, "A").with_target_type("sensor");
        let replies = match router.send(event.clone()).await {
            Routed::Broadcast(replies) => replies,
            other => panic!("expected broadcast, got {:?}", other),
        };

        assert_eq!(replies.len(), 4);
        let senders: Vec<_> = replies.iter().map(|r| r.sender_id.as_str()).collect();
        assert_eq!(senders, vec!["s0", "s1", "s2", "s3"]);

        for (i, sensor) in sensors.iter().enumerate() {
            let seen = sensor.seen();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].message_id, event.message_id);
            assert_eq!(seen[0].receiver_id.as_deref(), Some(format!("s{}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_broadcast_with_no_targets_is_empty() {
        let (router, _) = setup(vec![]);
        let event = Message::new(MessageType::Event, "A").with_target_type("sensor");
        assert!(router.send(event).await.into_messages().is_empty());
    }

    #[tokio::test]
    async fn test_direct_route_beats_intent() {
        let b = Tracker::new("B", "service");
        let c = Tracker::new("C", "service");
        let (router, _) = setup(vec![b.clone(), c.clone()]);

        router.add_route("A", "B", None);
        router.register_intent("diagnose", |_| Some("C".to_string()));

        let request = Message::request("A", "B", Value::Null).with_intent("diagnose");
        let reply = single(router.send(request).await);

        assert_eq!(reply.sender_id, "B");
        assert_eq!(b.seen().len(), 1);
        assert!(c.seen().is_empty());
    }

    #[tokio::test]
    async fn test_intent_overrides_unrouted_receiver() {
        let b = Tracker::new("B", "service");
        let c = Tracker::new("C", "service");
        let (router, _) = setup(vec![b.clone(), c.clone()]);

        router.register_intent("diagnose", |_| Some("C".to_string()));

        let request = Message::request("A", "B", Value::Null).with_intent("diagnose");
        let reply = single(router.send(request).await);

        assert_eq!(reply.sender_id, "C");
        assert!(b.seen().is_empty());
    }

    #[tokio::test]
    async fn test_intent_without_destination_falls_through() {
        let (router, _) = setup(vec![Tracker::new("s1", "sensor")]);
        router.register_intent("diagnose", |_| None);

        let event = Message::new(MessageType::Event, "A")
            .with_intent("diagnose")
            .with_target_type("sensor");
        assert_eq!(router.send(event).await.into_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_capability_index_resolver() {
        let (router, _) = setup(vec![Tracker::new("fast", "svc"), Tracker::new("slow", "svc")]);
        let index = Arc::new(CapabilityIndex::new());
        index.register(Capability::new("fast").with_intent("compute").with_score(0.9));
        index.register(Capability::new("slow").with_intent("compute").with_score(0.4));
        router.register_intent_resolver("compute", index.resolver());

        let request = Message::new(MessageType::Request, "A").with_intent("compute");
        assert_eq!(single(router.send(request).await).sender_id, "fast");
    }

    #[tokio::test]
    async fn test_no_route() {
        let (router, _) = setup(vec![]);
        let reply = single(router.send(Message::new(MessageType::Event, "A")).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::RoutingError));
    }

    #[tokio::test]
    async fn test_hop_monotonicity() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);

        let mut request = Message::request("A", "B", Value::Null);
        request.hop_path = vec!["upstream".to_string()];
        router.send(request).await;

        let delivered = &b.seen()[0];
        assert_eq!(delivered.hop_path, vec!["upstream", ROUTER]);
    }

    #[tokio::test]
    async fn test_validation_short_circuit() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);

        let mut request = Message::request("", "B", Value::Null);
        request.hop_path = vec!["x".to_string()];
        let reply = single(router.send(request).await);

        assert_eq!(reply.error_code(), Some(ErrorCode::InvalidMessage));
        assert_eq!(reply.hop_path, vec!["x"]);
        assert!(b.seen().is_empty());
    }

    #[tokio::test]
    async fn test_custom_validator() {
        let router = MeshRouter::builder(config())
            .validator(|m: &Message| {
                if m.payload.is_null() {
                    Err("payload required".to_string())
                } else {
                    Ok(())
                }
            })
            .build();

        let reply = single(router.send(Message::request("A", "B", Value::Null)).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::InvalidMessage));
        assert!(reply.payload["message"].as_str().unwrap().contains("payload required"));
    }

    #[tokio::test]
    async fn test_hop_limit() {
        let discovery = Arc::new(InMemoryDiscovery::new());
        let router = MeshRouter::with_discovery(config().with_max_hops(2), discovery);

        let mut request = Message::request("A", "B", Value::Null);
        request.hop_path = vec!["r1".to_string(), "r2".to_string()];
        let reply = single(router.send(request).await);

        assert_eq!(reply.error_code(), Some(ErrorCode::RoutingError));
        assert_eq!(reply.hop_path.len(), 2);
    }

    #[tokio::test]
    async fn test_compression_round_trip_on_delivery() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);
        router.register_codec_pair("application/json", lz4_codec());

        let payload = json!({"readings": [1.5, 2.5, 3.5], "unit": "bar"});
        let request = Message::request("A", "B", payload.clone()).with_content_type("application/json");
        let reply = single(router.send(request).await);

        assert_eq!(reply.message_type, MessageType::Response);
        let delivered = &b.seen()[0];
        assert_eq!(delivered.payload, payload);
        assert!(!delivered.is_compressed());
    }

    #[tokio::test]
    async fn test_codec_closures_are_applied_once() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);
        let compressions = Arc::new(AtomicU64::new(0));
        let counter = compressions.clone();

        router.register_codec(
            "text/reverse",
            move |v: &Value| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(json!(v.as_str().unwrap_or_default().chars().rev().collect::<String>()))
            },
            |v: &Value| Ok(json!(v.as_str().unwrap_or_default().chars().rev().collect::<String>())),
        );

        let request = Message::request("A", "B", json!("hello")).with_content_type("text/reverse");
        router.send(request).await;

        assert_eq!(compressions.load(Ordering::Relaxed), 1);
        assert_eq!(b.seen()[0].payload, json!("hello"));
    }

    #[tokio::test]
    async fn test_codec_failure_is_processing_error() {
        let (router, _) = setup(vec![Tracker::new("B", "service")]);
        router.register_codec(
            "broken",
            |_: &Value| Err(Error::CompressionFailed("nope".into())),
            |v: &Value| Ok(v.clone()),
        );

        let request = Message::request("A", "B", json!(1)).with_content_type("broken");
        let reply = single(router.send(request).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::ProcessingError));
    }

    #[tokio::test]
    async fn test_component_failure_is_contained() {
        let failing = Arc::new(FnComponent::new("bad", "svc", |_| {
            Err(Error::HandlerFailed("disk on fire".into()))
        }));
        let panicking = Arc::new(FnComponent::new("worse", "svc", |_| -> Result<ComponentOutput> {
            panic!("component exploded")
        }));
        let (router, _) = setup(vec![failing, panicking]);

        let reply = single(router.send(Message::request("A", "bad", Value::Null)).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::ProcessingError));
        assert_eq!(reply.receiver_id.as_deref(), Some("A"));

        let reply = single(router.send(Message::request("A", "worse", Value::Null)).await);
        assert_eq!(reply.error_code(), Some(ErrorCode::ProcessingError));
        assert!(reply.payload["message"]
            .as_str()
            .unwrap()
            .contains("component exploded"));
    }

    #[tokio::test]
    async fn test_component_message_passes_through() {
        let custom = Arc::new(FnComponent::new("B", "svc", |msg: Message| {
            let mut reply = Message::response(&msg, "B", json!("custom"));
            reply.message_id = "fixed-id".to_string();
            Ok(reply.into())
        }));
        let (router, _) = setup(vec![custom]);

        let reply = single(router.send(Message::request("A", "B", Value::Null)).await);
        assert_eq!(reply.message_id, "fixed-id");
    }

    #[tokio::test]
    async fn test_async_variant_preferred() {
        let (router, _) = setup(vec![Arc::new(AsyncEcho)]);
        let reply = single(router.send(Message::request("A", "async", Value::Null)).await);
        assert_eq!(reply.payload, json!("async"));
    }

    #[test]
    fn test_blocking_model() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone() as Arc<dyn Component>, Arc::new(AsyncEcho)]);

        let reply = single(router.send_blocking(Message::request("A", "B", Value::Null)));
        assert_eq!(reply.sender_id, "B");

        let reply = single(router.send_blocking(Message::request("A", "async", Value::Null)));
        assert_eq!(reply.payload, json!("async"));
    }

    #[tokio::test]
    async fn test_self_addressed_add_route() {
        let router = MeshRouter::new(config());

        let request = Message::request(
            "admin",
            ROUTER,
            json!({"operation": "add_route", "source": "A", "destination": "B"}),
        );
        let reply = single(router.send(request).await);

        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.payload["status"], json!("success"));
        assert!(router.get_route("A", "B").is_some());

        let listing = Message::request("admin", ROUTER, json!({"operation": "get_routes"}));
        let reply = single(router.send(listing).await);
        assert_eq!(reply.payload["routes"].as_array().unwrap().len(), 1);

        let query = Message::new(MessageType::Query, "admin")
            .with_receiver(ROUTER)
            .with_payload(json!({"query": "routes"}));
        let reply = single(router.send(query).await);
        assert_eq!(reply.payload["routes"][0]["source"], json!("A"));
    }

    #[tokio::test]
    async fn test_self_addressed_errors() {
        let router = MeshRouter::new(config());

        let missing = Message::request("admin", ROUTER, json!({"operation": "add_route"}));
        assert_eq!(
            router.send(missing).await.error_code(),
            Some(ErrorCode::InvalidPayload)
        );

        let unknown = Message::new(MessageType::Command, "admin")
            .with_receiver(ROUTER)
            .with_payload(json!({"command": "explode"}));
        assert_eq!(
            router.send(unknown).await.error_code(),
            Some(ErrorCode::UnsupportedCommand)
        );
    }

    #[tokio::test]
    async fn test_status_query() {
        let router = MeshRouter::new(config());
        router.add_route("A", "B", None);
        router.register_intent("x", |_| None);
        router.register_codec_pair("application/json", lz4_codec());
        router.register_handler(MessageType::Event, |_| Ok(None));
        router.enqueue(Message::new(MessageType::Event, "A"));

        let query = Message::new(MessageType::Query, "admin")
            .with_receiver(ROUTER)
            .with_payload(json!({"query": "status"}));
        let reply = single(router.send(query).await);
        let status: RouterStatus = serde_json::from_value(reply.payload).unwrap();

        assert_eq!(status.router_id, ROUTER);
        assert!(!status.running);
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.route_count, 1);
        assert_eq!(status.handler_count, 1);
        assert_eq!(status.intent_count, 1);
        assert_eq!(status.codec_count, 1);
    }

    #[tokio::test]
    async fn test_start_stop_commands() {
        let router = MeshRouter::new(config());
        let command = |name: &str| {
            Message::new(MessageType::Command, "admin")
                .with_receiver(ROUTER)
                .with_payload(json!({ "command": name }))
        };

        let reply = single(router.send(command("start")).await);
        assert_eq!(reply.payload["changed"], json!(true));
        let reply = single(router.send(command("start")).await);
        assert_eq!(reply.payload["changed"], json!(false));
        assert!(router.is_running());

        let reply = single(router.send(command("stop")).await);
        assert_eq!(reply.payload["changed"], json!(true));
        let reply = single(router.send(command("stop")).await);
        assert_eq!(reply.payload["changed"], json!(false));
        assert!(!router.is_running());
    }

    #[test]
    fn test_start_command_without_runtime() {
        let router = MeshRouter::new(config());
        let command = Message::new(MessageType::Command, "admin")
            .with_receiver(ROUTER)
            .with_payload(json!("start"));
        let routed = router.send_blocking(command);
        assert_eq!(routed.error_code(), Some(ErrorCode::ProcessingError));
    }

    #[tokio::test]
    async fn test_process_message_ingress() {
        let (router, _) = setup(vec![Tracker::new("B", "service")]);

        let raw = Message::request("A", "B", json!({"x": 1})).to_value().unwrap();
        let reply = router.process_message(raw).await;
        assert_eq!(reply["message_type"], json!("response"));
        assert_eq!(reply["sender_id"], json!("B"));

        let reply = router.process_message(json!([1, 2, 3])).await;
        assert_eq!(reply["payload"]["code"], json!("invalid_message"));

        let reply = router
            .process_message(json!({"message_id": "m1", "message_type": "gossip", "sender_id": "A"}))
            .await;
        assert_eq!(reply["payload"]["code"], json!("unsupported_message_type"));
        assert_eq!(reply["receiver_id"], json!("A"));
        assert_eq!(reply["payload"]["message_id"], json!("m1"));

        let reply = router
            .process_message(json!({"message_type": "event", "sender_id": 7}))
            .await;
        assert_eq!(reply["payload"]["code"], json!("invalid_message"));

        let reply = router
            .process_message(json!({"message_id": "m2", "sender_id": "A", "payload": 1}))
            .await;
        assert_eq!(reply["payload"]["code"], json!("unsupported_message_type"));
        assert_eq!(reply["receiver_id"], json!("A"));

        let reply = router
            .process_message(json!({"message_type": 3, "sender_id": "A"}))
            .await;
        assert_eq!(reply["payload"]["code"], json!("unsupported_message_type"));
    }

    #[test]
    fn test_process_json_ingress() {
        let router = MeshRouter::new(config());
        let reply = tokio_test::block_on(router.process_json("{not json"));
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["payload"]["code"], json!("invalid_message"));

        let event = Message::new(MessageType::Event, "A").to_json().unwrap();
        let reply = tokio_test::block_on(router.process_json(&event));
        let reply = Message::from_json(&reply).unwrap();
        assert_eq!(reply.error_code(), Some(ErrorCode::RoutingError));
    }

    #[tokio::test]
    async fn test_handler_dispatch() {
        let router = MeshRouter::new(config());
        router.register_handler(MessageType::Event, |_| Ok(None));
        router.register_handler(MessageType::Query, |msg: &Message| {
            Ok(Some(Message::response(msg, "handler", json!("answer"))))
        });
        router.register_handler(MessageType::Command, |_| {
            Err(Error::HandlerFailed("refused".into()))
        });

        let ack = router.dispatch(Message::new(MessageType::Event, "A")).await;
        assert_eq!(ack.payload["status"], json!("processed"));

        let answer = router.dispatch(Message::new(MessageType::Query, "A")).await;
        assert_eq!(answer.payload, json!("answer"));

        let refused = router.dispatch(Message::new(MessageType::Command, "A")).await;
        assert_eq!(refused.error_code(), Some(ErrorCode::ProcessingError));

        // Last write wins.
        router.register_handler(MessageType::Event, |msg: &Message| {
            Ok(Some(Message::response(msg, "v2", Value::Null)))
        });
        let reply = router.dispatch(Message::new(MessageType::Event, "A")).await;
        assert_eq!(reply.sender_id, "v2");
    }

    #[tokio::test]
    async fn test_dispatch_wraps_broadcast() {
        let (router, _) = setup(vec![Tracker::new("s1", "sensor"), Tracker::new("s2", "sensor")]);
        let event = Message::new(MessageType::Event, "A").with_target_type("sensor");

        let reply = router.dispatch(event).await;
        assert_eq!(reply.payload["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_routes_messages() {
        let b = Tracker::new("B", "service");
        let (router, _) = setup(vec![b.clone()]);

        for i in 0..5 {
            router.enqueue(Message::request("A", "B", json!(i)));
        }
        assert!(router.start().unwrap());

        for _ in 0..200 {
            if router.processed_count() >= 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let order: Vec<_> = b.seen().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(order, (0..5).map(|i| json!(i)).collect::<Vec<_>>());
        assert!(router.stop());
    }

    #[tokio::test]
    async fn test_queued_stop_command() {
        let router = MeshRouter::new(config());
        router.start().unwrap();

        router.enqueue(
            Message::new(MessageType::Command, "admin")
                .with_receiver(ROUTER)
                .with_payload(json!("stop")),
        );
        for _ in 0..200 {
            if !router.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!router.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_while_component_busy() {
        let slow = Arc::new(FnComponent::new("B", "service", |msg: Message| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(msg.payload.into())
        }));
        let (router, _) = setup(vec![slow]);

        router.enqueue(Message::request("A", "B", json!(1)));
        router.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(router.stop());
        router.enqueue(Message::request("A", "B", json!(2)));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(!router.is_running());
        assert_eq!(router.queue_depth(), 1);
        assert_eq!(router.processed_count(), 1);
    }

    #[tokio::test]
    async fn test_metrics_and_logging() {
        let (router, _) = setup(vec![Tracker::new("B", "service")]);

        router.send(Message::request("A", "B", Value::Null)).await;
        router.send(Message::request("A", "nobody", Value::Null)).await;

        let metrics = router.metrics();
        assert_eq!(metrics.total_routes, 2);
        assert_eq!(metrics.successful_routes, 1);
        assert_eq!(metrics.failed_routes, 1);

        let warnings = router.logger().get_logs_at_level(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].fields["code"], json!("component_not_found"));
    }

    #[tokio::test]
    async fn test_failed_broadcast_metrics() {
        let no_discovery = MeshRouter::new(config());
        let event = Message::new(MessageType::Event, "A").with_target_type("sensor");
        no_discovery.send(event.clone()).await;

        let metrics = no_discovery.metrics();
        assert_eq!(metrics.broadcasts, 1);
        assert_eq!(metrics.failed_routes, 1);
        assert_eq!(metrics.successful_routes, 0);

        let broken = Arc::new(FnComponent::new("s1", "sensor", |_| {
            Err(Error::HandlerFailed("offline".into()))
        }));
        let (router, _) = setup(vec![broken.clone() as Arc<dyn Component>, Tracker::new("s2", "sensor")]);
        router.send(event.clone()).await;
        assert_eq!(router.metrics().successful_routes, 1);

        let (all_broken, _) = setup(vec![broken]);
        all_broken.send(event).await;
        assert_eq!(all_broken.metrics().failed_routes, 1);
    }

    #[tokio::test]
    async fn test_routers_do_not_share_tables() {
        let first = MeshRouter::new(config());
        let second = MeshRouter::new(RouterConfig::new("other"));
        first.add_route("A", "B", None);

        assert!(second.get_route("A", "B").is_none());
        assert_ne!(first.logger().router_id(), second.logger().router_id());
    }
}
