//! The hub: root API tying registry, rooms, routes and plugins together.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use huddle_core::{ConnectionId, GLOBAL_ROOM, Outbound, Payload, Store, TopicBus, Transport};
use huddle_settings::{HubSettings, HuddleSettings, ServerSettings};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::errors::{HubError, RegistryError};
use crate::plugin::errors::{HookError, MethodError};
use crate::plugin::identity::allocate_connection_id;
use crate::plugin::methods::MethodRegistry;
use crate::plugin::pipeline::{PluginPipeline, log_hook_failure};
use crate::plugin::store::{compose_connection_store, compose_global_store};
use crate::plugin::{HookKind, Plugin, panic_message, plugin_label};
use crate::route::{Route, RouteContext};
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::connection::{Connection, ConnectionState, PendingConnection, RequestInfo};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::rooms::RoomIndex;

/// Registration attempts before admission gives up on a racing ID.
const MAX_ADMISSION_ATTEMPTS: usize = 8;

/// Which connections [`Hub::get_clients`] should consider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientQuery {
    /// Restrict to one room. `None` means every connection in any room.
    pub room: Option<String>,
    /// Return only the count.
    pub only_size: bool,
}

impl ClientQuery {
    /// Every live connection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Members of `room`.
    pub fn room(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            only_size: false,
        }
    }

    /// Ask for the count instead of the list.
    #[must_use]
    pub fn only_size(mut self) -> Self {
        self.only_size = true;
        self
    }
}

/// Result of [`Hub::get_clients`].
#[derive(Debug)]
pub enum Clients {
    /// Matching connections, sorted by ID.
    List(Vec<Arc<Connection>>),
    /// Number of matching connections.
    Count(usize),
}

impl Clients {
    /// Number of connections, whichever form this is.
    pub fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            Self::Count(count) => *count,
        }
    }

    /// Whether no connections matched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The list, or empty for a count.
    pub fn into_list(self) -> Vec<Arc<Connection>> {
        match self {
            Self::List(list) => list,
            Self::Count(_) => Vec::new(),
        }
    }
}

/// One room in [`Hub::rooms`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    /// Room name.
    pub name: String,
    /// Number of members.
    pub members: usize,
}

/// Builder for [`Hub`]. Plugins run in the order they are added.
#[derive(Default)]
#[must_use]
pub struct HubBuilder {
    settings: HuddleSettings,
    plugins: Vec<Arc<dyn Plugin>>,
    publish_to_self: Option<bool>,
    transport: Option<Arc<dyn Transport>>,
}

impl HubBuilder {
    /// Use `settings` for the server and hub sections.
    pub fn settings(mut self, settings: HuddleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a plugin.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Register a shared plugin.
    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Override `hub.publishToSelf` from the settings.
    pub fn publish_to_self(mut self, enabled: bool) -> Self {
        self.publish_to_self = Some(enabled);
        self
    }

    /// Use a custom transport instead of the in-process [`TopicBus`].
    ///
    /// Its publish behaviour must match the `publish_to_self` flag.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Compose the global store, run `init` hooks, then collect methods.
    pub async fn build(self) -> Hub {
        let mut hub_settings = self.settings.hub.clone();
        if let Some(enabled) = self.publish_to_self {
            hub_settings.publish_to_self = enabled;
        }
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TopicBus::new(hub_settings.publish_to_self)));
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomIndex::new(Arc::clone(&transport)));
        let broadcaster = BroadcastEngine::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            hub_settings.publish_to_self,
        );
        let global_store = compose_global_store(&self.plugins);
        let pipeline = PluginPipeline::new(self.plugins, hub_settings.hook_timeout());

        let hub = Hub {
            inner: Arc::new(HubInner {
                server: self.settings.server,
                hub: hub_settings,
                transport,
                registry,
                rooms,
                broadcaster,
                pipeline,
                global_store,
                methods: RwLock::new(MethodRegistry::new()),
                routes: RwLock::new(BTreeMap::new()),
                mounted: AtomicBool::new(false),
            }),
        };

        let init_failures = hub.inner.pipeline.run_init(&hub).await;
        for plugin in hub.inner.pipeline.plugins() {
            hub.register_methods(plugin.as_ref());
        }
        info!(
            plugins = hub.inner.pipeline.len(),
            methods = hub.inner.methods.read().len(),
            init_failures,
            "hub initialized"
        );
        hub
    }
}

struct HubInner {
    server: ServerSettings,
    hub: HubSettings,
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomIndex>,
    broadcaster: BroadcastEngine,
    pipeline: PluginPipeline,
    global_store: Store,
    methods: RwLock<MethodRegistry>,
    routes: RwLock<BTreeMap<String, Arc<Route>>>,
    mounted: AtomicBool,
}

/// Shared handle to the connection hub. Cloning is cheap.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Start building a hub.
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    /// Server settings the hub was built with.
    pub fn server_settings(&self) -> &ServerSettings {
        &self.inner.server
    }

    /// Hub settings the hub was built with.
    pub fn hub_settings(&self) -> &HubSettings {
        &self.inner.hub
    }

    /// Plugins in registration order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        self.inner.pipeline.plugins()
    }

    /// Hub-wide store shared by every connection and plugin.
    pub fn global_store(&self) -> &Store {
        &self.inner.global_store
    }

    // ── Routes ──────────────────────────────────────────────────────

    /// Create a route at `path` and let `setup` attach listeners.
    ///
    /// `:name` segments capture path parameters into [`RequestInfo::params`].
    pub fn create_route<F>(&self, path: &str, setup: F) -> Result<Arc<Route>, HubError>
    where
        F: FnOnce(&Route),
    {
        let route = Arc::new(Route::new(path.to_owned(), self.inner.broadcaster.clone()));
        {
            let mut routes = self.inner.routes.write();
            if routes.contains_key(path) {
                return Err(HubError::RouteExists(path.to_owned()));
            }
            let _ = routes.insert(path.to_owned(), Arc::clone(&route));
        }
        setup(route.as_ref());
        debug!(path, "route created");
        Ok(route)
    }

    /// Route at `path`.
    pub fn route(&self, path: &str) -> Option<Arc<Route>> {
        self.inner.routes.read().get(path).cloned()
    }

    /// Every route, sorted by path.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.inner.routes.read().values().cloned().collect()
    }

    // ── Broadcasting and queries ────────────────────────────────────

    /// Deliver to every member of `room`. Returns the number of deliveries.
    pub fn broadcast_to_room(&self, room: &str, payload: impl Into<Payload>) -> usize {
        self.inner
            .broadcaster
            .broadcast_to_room(room, &payload.into())
    }

    /// Deliver to every live connection.
    pub fn broadcast_global(&self, payload: impl Into<Payload>) -> usize {
        self.inner.broadcaster.broadcast_global(&payload.into())
    }

    /// Connections in a room, or in any room when `query.room` is `None`.
    ///
    /// An absent room yields an empty list or a count of 0. The count always
    /// equals the length of the list the same query would return.
    pub fn get_clients(&self, query: &ClientQuery) -> Clients {
        let ids = match &query.room {
            Some(room) => self.inner.rooms.members(room),
            None => self.inner.rooms.all_members(),
        };
        if query.only_size {
            let count = ids
                .iter()
                .filter(|id| self.inner.registry.contains(id))
                .count();
            return Clients::Count(count);
        }
        Clients::List(
            ids.iter()
                .filter_map(|id| self.inner.registry.get(id))
                .collect(),
        )
    }

    /// Live connection by ID.
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.registry.get(id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Every room with its member count, sorted by name.
    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.inner
            .rooms
            .snapshot()
            .into_iter()
            .map(|(name, members)| RoomSummary { name, members })
            .collect()
    }

    /// Request every live connection to close.
    pub fn close_all(&self) -> usize {
        let connections = self.inner.registry.all();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }

    // ── Methods ─────────────────────────────────────────────────────

    fn register_methods(&self, plugin: &dyn Plugin) {
        let set = match std::panic::catch_unwind(AssertUnwindSafe(|| plugin.methods(self))) {
            Ok(set) => set,
            Err(panic) => {
                let error = HookError::Panicked {
                    message: panic_message(panic.as_ref()),
                };
                log_hook_failure(plugin, HookKind::Methods, &error);
                return;
            }
        };
        let _ = self.inner.methods.write().extend(plugin_label(plugin), set);
    }

    /// Invoke the method registered under `name`.
    pub async fn call_method(
        &self,
        name: &str,
        connection: Option<&Connection>,
        params: Value,
    ) -> Result<Value, MethodError> {
        let handler = self
            .inner
            .methods
            .read()
            .get(name)
            .ok_or_else(|| MethodError::NotFound(name.to_owned()))?;
        let outcome = AssertUnwindSafe(handler.call(self, connection, params))
            .catch_unwind()
            .await;
        let source = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(panic) => HookError::Panicked {
                message: panic_message(panic.as_ref()),
            },
        };
        Err(MethodError::Failed {
            method: name.to_owned(),
            source,
        })
    }

    /// Whether a method named `name` exists.
    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.read().contains(name)
    }

    /// Sorted method names.
    pub fn methods(&self) -> Vec<String> {
        self.inner.methods.read().names()
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Admit and open a connection on the route at `route_path`.
    ///
    /// Runs the pre-ready phase (store composition, `on_pre_ready`, identity
    /// allocation), registers the connection and attaches `outbound`, then
    /// joins `global`, the route room and the connection's own room before
    /// running `on_open` hooks and route `open` listeners.
    #[instrument(skip_all, fields(route = route_path))]
    pub async fn connect(
        &self,
        route_path: &str,
        request: RequestInfo,
        outbound: Outbound,
    ) -> Result<Arc<Connection>, HubError> {
        let route = self
            .route(route_path)
            .ok_or_else(|| HubError::UnknownRoute(route_path.to_owned()))?;
        let store = compose_connection_store(self.plugins());
        let pending = PendingConnection::new(route.path(), request, store);
        let connection = self.admit(pending, outbound).await?;
        let _ = self.open(&route, &connection).await;
        Ok(connection)
    }

    async fn admit(
        &self,
        pending: PendingConnection,
        outbound: Outbound,
    ) -> Result<Arc<Connection>, HubError> {
        let inner = &self.inner;
        let mut default_id = ConnectionId::generate();
        let _ = inner.pipeline.run_pre_ready(&pending, self).await;

        for _ in 0..MAX_ADMISSION_ATTEMPTS {
            let id = allocate_connection_id(inner.pipeline.plugins(), &pending, default_id, &inner.registry);
            let connection = Arc::new(Connection::new(
                id,
                &pending,
                Arc::clone(&inner.rooms),
                Arc::clone(&inner.transport),
                inner.hub.publish_to_self,
            ));
            match inner.registry.try_register(Arc::clone(&connection)) {
                Ok(()) => {
                    inner.transport.attach(connection.id(), outbound);
                    return Ok(connection);
                }
                Err(RegistryError::IdentityConflict(id)) => {
                    debug!(connection_id = %id, "lost registration race, reallocating");
                    default_id = ConnectionId::generate();
                }
            }
        }
        Err(HubError::IdentityExhausted {
            attempts: MAX_ADMISSION_ATTEMPTS,
        })
    }

    /// Returns `false` when a close won the race and nothing was opened.
    async fn open(&self, route: &Route, connection: &Arc<Connection>) -> bool {
        let _turn = connection.turn().lock().await;
        if !connection.mark_open() {
            debug!(connection_id = %connection.id(), "closed before open, skipping");
            return false;
        }
        for room in [GLOBAL_ROOM, route.room_id(), connection.id().as_str()] {
            let _ = self.inner.rooms.join(connection, room);
        }
        info!(connection_id = %connection.id(), route = route.path(), "connection opened");

        let _ = self.inner.pipeline.run_open(connection, self).await;
        let cx = RouteContext {
            hub: self,
            route,
            connection,
        };
        let _ = route.emit_open(&cx);
        true
    }

    /// Handle one inbound message.
    ///
    /// Messages for one connection are processed one at a time, in order.
    /// Returns `false` when the connection is no longer open.
    pub async fn dispatch(&self, connection: &Arc<Connection>, payload: Payload) -> bool {
        let _turn = connection.turn().lock().await;
        if !connection.is_open() {
            debug!(connection_id = %connection.id(), "message after close ignored");
            return false;
        }
        let Some(route) = self.route(connection.route()) else {
            return false;
        };
        let _ = self
            .inner
            .pipeline
            .run_message(connection, &payload, self)
            .await;
        let cx = RouteContext {
            hub: self,
            route: &route,
            connection,
        };
        let _ = route.emit_message(&cx, &payload);
        true
    }

    /// Run the close sequence for `connection`.
    ///
    /// Waits for an in-flight open or message to finish, runs `on_close` hooks and
    /// route `close` listeners while memberships are intact, then leaves
    /// every room and unregisters. Only the first call does anything.
    ///
    /// Must not be awaited from this connection's own open or message hooks; use
    /// [`Connection::close`] there.
    pub async fn disconnect(&self, connection: &Arc<Connection>) -> bool {
        if !connection.begin_close() {
            return false;
        }
        connection.close();
        let _turn = connection.turn().lock().await;

        let _ = self.inner.pipeline.run_close(connection, self).await;
        if let Some(route) = self.route(connection.route()) {
            let cx = RouteContext {
                hub: self,
                route: &route,
                connection,
            };
            let _ = route.emit_close(&cx);
        }

        let left = self.inner.rooms.leave_all(connection);
        let _ = self.inner.registry.unregister(connection.id());
        self.inner.transport.detach(connection.id());
        connection.set_state(ConnectionState::Closed);
        info!(connection_id = %connection.id(), rooms = left.len(), "connection closed");
        true
    }

    pub(crate) fn mark_mounted(&self) {
        self.inner.mounted.store(true, Ordering::Release);
    }

    /// Whether the hub was merged into a host router.
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::Acquire)
    }
}
