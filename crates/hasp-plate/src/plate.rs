//! The plate aggregate
//!
//! A [`Plate`] owns everything one panel needs: its availability, its page
//! and dim state, its object mirrors and the table mapping each subscribed
//! topic to a handler. It is driven by exactly one task feeding it
//! [`PlateInput`]s in arrival order, so handlers take `&mut self` and never
//! race each other. A handler may still yield at a publish or a service
//! call, but it never holds a check-and-set across such a point.

use crate::availability::{Availability, AvailabilityTracker, Transition};
use crate::command::PlateCommand;
use crate::error::{PlateError, PlateResult};
use crate::navigator::{light_payload, IdleDim, NavButton, PageNavigator, HOME_PAGE};
use crate::object::{ObjectMirror, PropertyUpdate, ToggleRequest};
use crate::router::EventRouter;
use crate::transport::{InboundMessage, MqttPublisher, PlateSnapshot, RestoreStore, ServiceCaller};
use futures::future::join_all;
use hasp_config::{AllowList, PlateConfig};
use hasp_core::events::{PlateOfflineData, PlateOnlineData, StateChangedData};
use hasp_core::message::{parse_page, IdleState, Lwt, ObjectMessage, StatusUpdate};
use hasp_core::{Context, EntityId, ObjectId, PlateTopics, ServiceCall, DOMAIN};
use hasp_event_bus::EventBus;
use hasp_state_machine::StateMachine;
use hasp_template::TemplateEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, instrument, trace, warn};

/// Firmware line this bridge speaks
pub const SUPPORTED_FIRMWARE: (u32, u32) = (0, 6);

/// Everything a plate talks to
#[derive(Clone)]
pub struct Collaborators {
    pub publisher: Arc<dyn MqttPublisher>,
    pub services: Arc<dyn ServiceCaller>,
    pub store: Arc<dyn RestoreStore>,
    pub state_machine: Arc<StateMachine>,
    pub templates: Arc<TemplateEngine>,
    pub event_bus: Arc<EventBus>,
    pub allowlist: AllowList,
}

/// One unit of work for a plate's runner
#[derive(Debug, Clone)]
pub enum PlateInput {
    Mqtt(InboundMessage),
    StateChanged(StateChangedData),
    Command(PlateCommand),
}

/// Handler for one subscribed topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Lwt,
    Idle,
    Page,
    StatusUpdate,
    /// `<base>/state/<obj>`: an object mirror, a navigation button, or both
    Widget {
        object: Option<usize>,
        button: Option<NavButton>,
    },
}

pub struct Plate {
    name: String,
    hwid: String,
    entity_id: EntityId,
    topics: PlateTopics,
    availability: AvailabilityTracker,
    navigator: PageNavigator,
    idle_dim: IdleDim,
    objects: Vec<ObjectMirror>,
    routes: HashMap<String, Route>,
    router: EventRouter,
    pages_path: Option<PathBuf>,
    status: Option<StatusUpdate>,
    collab: Collaborators,
}

impl Plate {
    /// Build a plate from validated configuration
    pub fn new(name: impl Into<String>, config: PlateConfig, collab: Collaborators) -> PlateResult<Self> {
        let name = name.into();
        let entity_id = EntityId::new(DOMAIN, &name)?;
        let topics = PlateTopics::new(config.topic.clone());
        let hwid = config.hwid(&name).to_string();
        let navigator = PageNavigator::new(&config.pages);
        let idle_dim = IdleDim::new(&config);
        let pages_path = config.pages.path.clone();

        let objects = config
            .objects
            .into_iter()
            .map(|object| ObjectMirror::new(object, &collab.templates))
            .collect::<PlateResult<Vec<_>>>()?;

        let mut routes = HashMap::from([
            (topics.lwt(), Route::Lwt),
            (topics.idle_state(), Route::Idle),
            (topics.page_state(), Route::Page),
            (topics.statusupdate_state(), Route::StatusUpdate),
        ]);
        for (index, object) in objects.iter().enumerate() {
            routes.insert(
                topics.object_state(object.id()),
                Route::Widget {
                    object: Some(index),
                    button: None,
                },
            );
        }
        for (obj, nav) in navigator.buttons() {
            let route = routes
                .entry(topics.object_state(obj))
                .or_insert(Route::Widget {
                    object: None,
                    button: None,
                });
            if let Route::Widget { button, .. } = route {
                *button = Some(nav);
            }
        }

        debug!(plate = %name, objects = objects.len(), routes = routes.len(), "Built plate");

        Ok(Self {
            router: EventRouter::new(collab.templates.clone()),
            name,
            hwid,
            entity_id,
            topics,
            availability: AvailabilityTracker::new(),
            navigator,
            idle_dim,
            objects,
            routes,
            pages_path,
            status: None,
            collab,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn topics(&self) -> &PlateTopics {
        &self.topics
    }

    /// Topics the plate must be subscribed to, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn availability(&self) -> Availability {
        self.availability.state()
    }

    pub fn current_page(&self) -> u32 {
        self.navigator.current()
    }

    pub fn num_pages(&self) -> u32 {
        self.navigator.num_pages()
    }

    pub fn dim(&self) -> u32 {
        self.idle_dim.dim()
    }

    pub fn backlight(&self) -> bool {
        self.idle_dim.backlight()
    }

    pub fn idle(&self) -> IdleState {
        self.idle_dim.idle()
    }

    pub fn status(&self) -> Option<&StatusUpdate> {
        self.status.as_ref()
    }

    pub fn object(&self, obj: ObjectId) -> Option<&ObjectMirror> {
        self.objects.iter().find(|object| object.id() == obj)
    }

    /// Restore persisted state and push the initial picture to the panel
    #[instrument(skip(self), fields(plate = %self.name))]
    pub async fn start(&mut self) {
        info!(topic = %self.topics.base(), "Starting plate");

        match self.collab.store.load(&self.name).await {
            Ok(Some(snapshot)) => {
                if self.navigator.change_page(snapshot.page).is_err() {
                    warn!(page = snapshot.page, "Restored page out of range, using home page");
                }
                self.idle_dim.restore(snapshot.dim, snapshot.backlight);
                debug!(?snapshot, "Restored plate state");
            }
            Ok(None) => debug!("No saved state"),
            Err(err) => warn!(%err, "Cannot load saved state"),
        }

        self.publish(self.topics.command(), "statusupdate").await;
        self.publish_backlight().await;

        let mut pending = Vec::new();
        for object in &mut self.objects {
            let updates = object.sync_all(&self.collab.templates, &self.collab.state_machine);
            pending.extend(updates.into_iter().map(|u| (object.id(), u)));
        }
        for (obj, update) in pending {
            self.publish_property(obj, update).await;
        }

        self.sync_entity();
    }

    /// Process one input; never fails past this boundary
    pub async fn handle(&mut self, input: PlateInput) {
        match input {
            PlateInput::Mqtt(message) => self.handle_message(message).await,
            PlateInput::StateChanged(data) => self.handle_state_changed(&data).await,
            PlateInput::Command(command) => self.execute(command).await,
        }
    }

    pub async fn handle_message(&mut self, message: InboundMessage) {
        let Some(route) = self.routes.get(&message.topic).copied() else {
            trace!(plate = %self.name, topic = %message.topic, "No route for topic");
            return;
        };

        match route {
            Route::Lwt => self.on_lwt(&message.payload).await,
            Route::Idle => self.on_idle(&message.payload).await,
            Route::Page => self.on_page(&message.payload).await,
            Route::StatusUpdate => self.on_statusupdate(&message.payload).await,
            Route::Widget { object, button } => {
                self.on_widget(&message.topic, object, button, &message.payload)
                    .await
            }
        }
    }

    async fn on_lwt(&mut self, payload: &[u8]) {
        let lwt = match Lwt::parse(payload) {
            Ok(lwt) => lwt,
            Err(err) => {
                warn!(plate = %self.name, %err, "Ignoring LWT payload");
                return;
            }
        };

        match self.availability.handle(lwt) {
            Transition::WentOnline => {
                info!(plate = %self.name, "Plate online");
                self.collab.event_bus.fire_typed(
                    PlateOnlineData {
                        plate: self.name.clone(),
                    },
                    Context::new(),
                );
                self.sync_entity();

                if let Some(path) = self.pages_path.clone() {
                    if let Err(err) = self.upload_pages(&path).await {
                        self.log_error("load pages", &err);
                    }
                }
                self.refresh().await;
            }
            Transition::WentOffline => {
                info!(plate = %self.name, "Plate offline");
                self.collab.event_bus.fire_typed(
                    PlateOfflineData {
                        plate: self.name.clone(),
                    },
                    Context::new(),
                );
                self.sync_entity();
            }
            Transition::Unchanged => {
                debug!(plate = %self.name, ?lwt, "Repeated LWT");
            }
        }
    }

    async fn on_idle(&mut self, payload: &[u8]) {
        let idle = match IdleState::parse(payload) {
            Ok(idle) => idle,
            Err(err) => {
                warn!(plate = %self.name, %err, "Ignoring idle payload");
                return;
            }
        };

        debug!(plate = %self.name, idle = idle.as_str(), "Idle state");
        self.idle_dim.on_idle(idle);
        self.publish_backlight().await;
        self.persist().await;
        self.sync_entity();
    }

    async fn on_page(&mut self, payload: &[u8]) {
        let page = match parse_page(payload) {
            Ok(page) => page,
            Err(err) => {
                warn!(plate = %self.name, %err, "Ignoring page payload");
                return;
            }
        };

        match self.navigator.change_page(page) {
            Ok(_) => {
                debug!(plate = %self.name, page, "Panel changed page");
                self.persist().await;
                self.sync_entity();
            }
            Err(err) => error!(plate = %self.name, %err, "Panel reported invalid page"),
        }
    }

    async fn on_statusupdate(&mut self, payload: &[u8]) {
        let status = match StatusUpdate::parse(payload) {
            Ok(status) => status,
            Err(err) => {
                warn!(plate = %self.name, %err, "Ignoring statusupdate payload");
                return;
            }
        };

        match status.firmware_line() {
            Some(line) if line == SUPPORTED_FIRMWARE => {}
            _ => error!(
                plate = %self.name,
                version = %status.version,
                "Unsupported firmware, expected {}.{}.x",
                SUPPORTED_FIRMWARE.0,
                SUPPORTED_FIRMWARE.1
            ),
        }

        if let Some(num_pages) = status.num_pages {
            self.navigator.set_num_pages(num_pages);
        }
        if let Some(page) = status.page {
            if let Err(err) = self.navigator.change_page(page) {
                error!(plate = %self.name, %err, "Status reports invalid page");
            }
        }

        info!(plate = %self.name, node = %status.node, version = %status.version, "Status update");
        self.status = Some(status);

        if self.navigator.revalidate() {
            warn!(plate = %self.name, num_pages = self.navigator.num_pages(), "Page beyond reported bound, going home");
            self.publish(self.topics.page_command(), HOME_PAGE.to_string())
                .await;
        }
        self.persist().await;
        self.sync_entity();
    }

    async fn on_widget(
        &mut self,
        topic: &str,
        object: Option<usize>,
        button: Option<NavButton>,
        payload: &[u8],
    ) {
        let message = match ObjectMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(plate = %self.name, %topic, %err, "Ignoring object payload");
                return;
            }
        };

        if let Some(button) = button {
            if message.event.as_ref().is_some_and(|e| e.is_press()) {
                let target = self.navigator.target(button);
                if let Err(err) = self.change_page(target).await {
                    self.log_error("navigate", &err);
                }
            }
        }

        let Some(object) = object.and_then(|index| self.objects.get_mut(index)) else {
            return;
        };
        let toggle = object.apply_message(&message);
        let context = Context::new();
        let calls = self
            .router
            .calls_for(object.id(), object.events(), &message, &context);

        if let Some(toggle) = toggle {
            self.toggle_entity(toggle, &context).await;
        }
        for call in calls {
            self.call_service(call).await;
        }
    }

    /// Switch a tracked entity unless it is already where the panel wants it
    async fn toggle_entity(&self, request: ToggleRequest, context: &Context) {
        let entity_id = request.entity_id.to_string();
        if self
            .collab
            .state_machine
            .is_state(&entity_id, request.target_state())
        {
            debug!(plate = %self.name, %entity_id, "Entity already in requested state");
            return;
        }

        let call = ServiceCall::for_entity(
            request.entity_id.domain(),
            request.service(),
            &request.entity_id,
            Context::caused_by(context),
        );
        self.call_service(call).await;
    }

    async fn call_service(&self, call: ServiceCall) {
        let service = call.service_id();
        debug!(plate = %self.name, %service, "Calling service");
        if let Err(err) = self.collab.services.call_service(call).await {
            error!(plate = %self.name, %service, %err, "Service call failed");
        }
    }

    pub async fn handle_state_changed(&mut self, data: &StateChangedData) {
        let entity_id = data.entity_id.to_string();

        let mut pending = Vec::new();
        for object in &mut self.objects {
            let updates =
                object.on_state_changed(&entity_id, data.new_state.as_ref(), &self.collab.templates);
            pending.extend(updates.into_iter().map(|u| (object.id(), u)));
        }

        if pending.is_empty() {
            return;
        }
        if self.availability.is_offline() {
            debug!(plate = %self.name, %entity_id, count = pending.len(), "Plate offline, cached only");
            return;
        }
        for (obj, update) in pending {
            self.publish_property(obj, update).await;
        }
    }

    /// Run a plate service
    pub async fn execute(&mut self, command: PlateCommand) {
        debug!(plate = %self.name, ?command, "Executing command");

        let result = match command {
            PlateCommand::Wakeup => {
                self.publish(self.topics.command(), "wakeup").await;
                Ok(())
            }
            PlateCommand::NextPage => {
                self.change_page(self.navigator.target(NavButton::Next))
                    .await
            }
            PlateCommand::PrevPage => {
                self.change_page(self.navigator.target(NavButton::Prev))
                    .await
            }
            PlateCommand::ChangePage(page) => self.change_page(page).await,
            PlateCommand::LoadPages(path) => self.load_pages(&path).await,
            PlateCommand::ClearPage(page) => self.clear_page(page).await,
            PlateCommand::Refresh => {
                self.refresh().await;
                Ok(())
            }
            PlateCommand::Backlight { on, brightness } => self.set_backlight(on, brightness).await,
        };

        if let Err(err) = result {
            self.log_error("command", &err);
        }
    }

    /// Show `page` on the panel
    pub async fn change_page(&mut self, page: u32) -> PlateResult<()> {
        let page = self.navigator.change_page(page)?;
        self.publish(self.topics.page_command(), page.to_string())
            .await;
        self.persist().await;
        self.sync_entity();
        Ok(())
    }

    pub async fn clear_page(&mut self, page: Option<u32>) -> PlateResult<()> {
        match page {
            Some(page) => {
                let page = self.navigator.validate(page)?;
                self.publish(self.topics.command(), format!("clearpage {page}"))
                    .await;
                Ok(())
            }
            None => {
                self.publish(self.topics.command(), "clearpage all").await;
                self.change_page(HOME_PAGE).await
            }
        }
    }

    pub async fn set_backlight(&mut self, on: bool, brightness: Option<u32>) -> PlateResult<()> {
        self.idle_dim.set_backlight(on, brightness)?;
        self.publish_backlight().await;
        self.persist().await;
        self.sync_entity();
        Ok(())
    }

    /// Send a page-definition file to the panel, then refresh
    pub async fn load_pages(&mut self, path: &Path) -> PlateResult<()> {
        self.upload_pages(path).await?;
        self.refresh().await;
        Ok(())
    }

    #[instrument(skip(self, path), fields(plate = %self.name, path = %path.display()))]
    async fn upload_pages(&self, path: &Path) -> PlateResult<()> {
        // Nothing about a path outside the allowlist is looked at, not even whether it exists
        let allowlist = self.collab.allowlist.clone();
        let candidate = path.to_path_buf();
        let allowed = tokio::task::spawn_blocking(move || allowlist.is_allowed(&candidate))
            .await
            .unwrap_or(false);
        if !allowed {
            return Err(PlateError::PathNotAllowed(path.to_path_buf()));
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| PlateError::PagesFile {
                path: path.to_path_buf(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(PlateError::NotAFile(path.to_path_buf()));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| PlateError::PagesFile {
                path: path.to_path_buf(),
                source,
            })?;

        for page in HOME_PAGE..=self.navigator.num_pages() {
            self.publish(self.topics.command(), format!("clearpage {page}"))
                .await;
        }

        let jsonl_topic = self.topics.jsonl_command();
        let mut lines = BufReader::new(file).lines();
        let mut sent = 0usize;
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|source| PlateError::PagesFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            let Some(line) = line else { break };

            if line.trim().is_empty() {
                continue;
            }
            self.publish(jsonl_topic.clone(), line).await;
            sent += 1;
        }

        info!(lines = sent, "Loaded pages");
        Ok(())
    }

    /// Replay every cached value, the page and the backlight to the panel
    ///
    /// Publishes are issued together; MQTT gives no acknowledgement to wait for.
    pub async fn refresh(&self) {
        if self.availability.is_offline() {
            debug!(plate = %self.name, "Plate offline, skipping refresh");
            return;
        }

        let mut messages: Vec<(String, String)> = self
            .objects
            .iter()
            .flat_map(|object| {
                object.cached_updates().into_iter().map(move |update| {
                    (
                        self.topics.object_command(object.id(), &update.property),
                        update.value,
                    )
                })
            })
            .collect();
        messages.push((
            self.topics.page_command(),
            self.navigator.current().to_string(),
        ));
        messages.push((self.topics.dim_command(), self.idle_dim.dim().to_string()));
        messages.push((
            self.topics.light_command(),
            light_payload(self.idle_dim.backlight()).to_string(),
        ));

        let publisher = &self.collab.publisher;
        let results = join_all(
            messages
                .iter()
                .map(|(topic, payload)| publisher.publish(topic, payload.clone())),
        )
        .await;

        for ((topic, _), result) in messages.iter().zip(results) {
            if let Err(err) = result {
                warn!(plate = %self.name, %topic, %err, "Refresh publish failed");
            }
        }
        info!(plate = %self.name, count = messages.len(), "Refreshed plate");
    }

    async fn publish_property(&self, obj: ObjectId, update: PropertyUpdate) {
        self.publish(self.topics.object_command(obj, &update.property), update.value)
            .await;
    }

    async fn publish_backlight(&self) {
        self.publish(self.topics.dim_command(), self.idle_dim.dim().to_string())
            .await;
        self.publish(
            self.topics.light_command(),
            light_payload(self.idle_dim.backlight()),
        )
        .await;
    }

    async fn publish(&self, topic: String, payload: impl Into<String>) {
        let payload = payload.into();
        debug!(plate = %self.name, %topic, %payload, "Publishing");
        if let Err(err) = self.collab.publisher.publish(&topic, payload).await {
            warn!(plate = %self.name, %topic, %err, "Publish failed");
        }
    }

    async fn persist(&self) {
        let snapshot = PlateSnapshot {
            page: self.navigator.current(),
            dim: self.idle_dim.dim(),
            backlight: self.idle_dim.backlight(),
        };
        if let Err(err) = self.collab.store.save(&self.name, &snapshot).await {
            warn!(plate = %self.name, %err, "Cannot save plate state");
        }
    }

    /// Mirror the plate itself as `openhasp.<name>`
    fn sync_entity(&self) {
        let mut attributes = HashMap::new();
        if let Some(Value::Object(status)) = self
            .status
            .as_ref()
            .and_then(|status| serde_json::to_value(status).ok())
        {
            attributes.extend(status.into_iter().filter(|(key, _)| key != "page"));
        }
        attributes.insert("hwid".to_string(), Value::from(self.hwid.clone()));
        attributes.insert("topic".to_string(), Value::from(self.topics.base()));
        attributes.insert("dim".to_string(), Value::from(self.idle_dim.dim()));
        attributes.insert("backlight".to_string(), Value::from(self.idle_dim.backlight()));
        attributes.insert("idle".to_string(), Value::from(self.idle_dim.idle().as_str()));
        attributes.insert("available".to_string(), Value::from(self.availability.is_online()));

        self.collab.state_machine.set(
            self.entity_id.clone(),
            self.navigator.current().to_string(),
            attributes,
            Context::new(),
        );
    }

    fn log_error(&self, action: &str, err: &PlateError) {
        match err {
            PlateError::InvalidPage { .. }
            | PlateError::InvalidTemplate { .. }
            | PlateError::PathNotAllowed(_) => {
                error!(plate = %self.name, action, %err, "Plate operation rejected")
            }
            _ => warn!(plate = %self.name, action, %err, "Plate operation failed"),
        }
    }
}
