use crate::align::{ReviewMode, Token};
use crate::config::{AppConfig, ConfigError, KeyValueStore};
use crate::connection::{
    BackendLink, BackendRequest, BackendResponse, ConnectionState, DEFAULT_RECONNECT_DELAY,
    LinkError, LinkHandlers, MAX_IMPROVEMENT_LEVEL, ReconnectPolicy, improvement_label,
};
use crate::review::{
    BoardOptions, ClearTicket, EmptyAnnotationPolicy, Highlight, NoCelebration, ReviewBoard,
    ReviewError, ReviewStatus, Toggle,
};
use crate::submission::SubmissionContext;
use crate::telemetry::{
    ChannelReporter, LogCelebration, TraceEnvelope, TraceLog, run_trace_uploader, trace_endpoint,
};
use crate::tour::{TargetId, TargetRegistry, Tour, TourAction, TourScript, TourStage, demo_recipe};
use askama::Template;
use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use cookie::{Cookie, SameSite};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn};

type SharedState = Arc<AppState>;
type SessionHandle = Arc<Mutex<Session>>;
type CookieHeaders = AppendHeaders<Vec<(HeaderName, String)>>;

const APP_PATH: &str = "/app";
const RESULT_PATH: &str = "/result";
const HOME_PATH: &str = "/";
const MIN_RECIPE_LEN: usize = 25;
const RESULT_REDIRECT_SECS: u32 = 5;
const WAITING_REFRESH_SECS: u32 = 2;
const COOKIE_MAX_AGE_SECS: i64 = 31_536_000;
const MAX_COOKIE_VALUE_LEN: usize = 4096;

const CONNECTION_FAILED: &str = "Connection to the server failed. Please try again.";
const RECIPE_TOO_SHORT: &str = "Please enter a longer recipe.";
const SOMETHING_WRONG: &str = "Something went wrong. Please try again.";
const LEVEL_WARNING: &str =
    "Note this might result in a significant deviation from the original recipe.";

const GUIDE_STEPS: [(&str, &str); 4] = [
    (
        "Your Recipe",
        "Write your recipe! And click submit to get a new recipe!",
    ),
    (
        "Wait for it!",
        "We are cooking your improved recipe! Please wait!",
    ),
    (
        "Mark the changes!",
        "Your new recipe is here! Click on the words you think are new!",
    ),
    ("Done!", "You are done!"),
];

const MARK_STYLES: &str = r#"
      .token { border-radius: 0.25rem; padding: 0 0.15rem; cursor: pointer; }
      .mark-info { background: #bae0ff; color: #003eb3; }
      .mark-warning { background: #ffccc7; color: #a8071a; animation: miss-fade 1s ease-out forwards; }
      .mark-success { background: #d9f7be; color: #237804; }
      .mark-caution { background: #ffe7ba; color: #ad4e00; }
      @keyframes miss-fade { from { opacity: 1; } to { opacity: 0.35; } }
"#;

pub struct AppState {
    config: WebConfig,
    sessions: Mutex<LruCache<String, SessionHandle>>,
    board_options: BoardOptions,
    traces: mpsc::UnboundedSender<TraceEnvelope>,
    trace_log: TraceLog,
}

impl AppState {
    /// Builds the state plus the receiving end of its result queue.
    fn new(config: WebConfig) -> (Self, mpsc::UnboundedReceiver<TraceEnvelope>) {
        let trace_log = match &config.trace_log {
            Some(path) => TraceLog::persistent(path.clone()),
            None => TraceLog::ephemeral(),
        };
        let board_options = BoardOptions {
            empty_annotations: config.empty_annotations,
            celebration: Arc::new(LogCelebration::new(trace_log.clone())),
        };
        let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        let (traces, rx) = mpsc::unbounded_channel();
        let state = Self {
            config,
            sessions: Mutex::new(LruCache::new(capacity)),
            board_options,
            traces,
            trace_log,
        };
        (state, rx)
    }

    fn session(&self, user_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(user_id) {
            return Arc::clone(handle);
        }
        let handle = Arc::new(Mutex::new(Session::new(user_id)));
        if let Some((evicted, _)) = sessions.push(user_id.to_string(), Arc::clone(&handle)) {
            debug!(user = %evicted, "evicted idle session");
        }
        handle
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Light,
    Dark,
}

impl WebTheme {
    fn from_dark_mode(dark_mode: bool) -> Self {
        if dark_mode { WebTheme::Dark } else { WebTheme::Light }
    }
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Light => write!(f, "light"),
            WebTheme::Dark => write!(f, "dark"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    theme: WebTheme,
    body_class: &'static str,
    main_class: &'static str,
    card_class: &'static str,
    panel_class: &'static str,
    eyebrow_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    cta_group_class: &'static str,
    button_class: &'static str,
    quiet_button_class: &'static str,
    input_class: &'static str,
    muted_class: &'static str,
    success_class: &'static str,
    error_class: &'static str,
    info_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Light => Self {
                theme,
                body_class: "bg-slate-50 text-slate-900",
                main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4",
                card_class: "max-w-6xl w-full space-y-6",
                panel_class: "bg-white shadow rounded p-5 space-y-4",
                eyebrow_class: "uppercase tracking-wide text-sm text-slate-500",
                headline_class: "text-4xl font-extrabold tracking-tight",
                lede_class: "text-lg text-slate-600",
                cta_group_class: "flex flex-wrap gap-3",
                button_class: "inline-flex items-center rounded-md bg-slate-900 px-4 py-2 text-white font-semibold shadow hover:bg-slate-800 transition-colors",
                quiet_button_class: "inline-flex items-center rounded-md border border-slate-300 px-3 py-1 text-slate-700 hover:bg-slate-100",
                input_class: "w-full rounded border border-slate-300 bg-white p-3 text-slate-900",
                muted_class: "text-sm text-slate-500",
                success_class: "rounded border border-green-300 bg-green-50 p-4 text-green-900",
                error_class: "rounded border border-red-300 bg-red-50 p-4 text-red-900",
                info_class: "rounded border border-sky-300 bg-sky-50 p-4 text-sky-900",
            },
            WebTheme::Dark => Self {
                theme,
                body_class: "bg-slate-900 text-slate-100",
                main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4",
                card_class: "max-w-6xl w-full space-y-6",
                panel_class: "bg-slate-800 shadow rounded p-5 space-y-4",
                eyebrow_class: "uppercase tracking-wide text-sm text-slate-400",
                headline_class: "text-4xl font-extrabold tracking-tight text-white",
                lede_class: "text-lg text-slate-300",
                cta_group_class: "flex flex-wrap gap-3",
                button_class: "inline-flex items-center rounded-md bg-amber-400 px-4 py-2 text-slate-900 font-semibold shadow hover:bg-amber-300 transition-colors",
                quiet_button_class: "inline-flex items-center rounded-md border border-slate-600 px-3 py-1 text-slate-200 hover:bg-slate-700",
                input_class: "w-full rounded border border-slate-600 bg-slate-900 p-3 text-slate-100",
                muted_class: "text-sm text-slate-400",
                success_class: "rounded border border-green-700 bg-green-950 p-4 text-green-100",
                error_class: "rounded border border-red-700 bg-red-950 p-4 text-red-100",
                info_class: "rounded border border-sky-700 bg-sky-950 p-4 text-sky-100",
            },
        }
    }

    fn notice_class(&self, kind: NoticeKind) -> &'static str {
        match kind {
            NoticeKind::Success => self.success_class,
            NoticeKind::Error => self.error_class,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    /// WebSocket endpoint of the recipe-improvement service.
    pub backend_ws_url: Option<String>,
    /// HTTP base of the same service; results are POSTed to `<base>/trace`.
    pub backend_http_url: Option<String>,
    pub trace_log: Option<PathBuf>,
    pub reconnect_delay: Duration,
    pub max_sessions: usize,
    pub empty_annotations: EmptyAnnotationPolicy,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://127.0.0.1:8080".to_string(),
            backend_ws_url: None,
            backend_http_url: None,
            trace_log: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_sessions: 1024,
            empty_annotations: EmptyAnnotationPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let (state, traces) = AppState::new(config.clone());
    let endpoint = config.backend_http_url.as_deref().map(trace_endpoint);
    let uploader = tokio::spawn(run_trace_uploader(
        traces,
        reqwest::Client::new(),
        endpoint.clone(),
        state.trace_log.clone(),
    ));
    let router = build_router(Arc::new(state));
    info!(
        addr = %config.addr,
        base = %config.base_url,
        backend = config.backend_ws_url.as_deref().unwrap_or("-"),
        trace = endpoint.as_deref().unwrap_or("-"),
        max_sessions = config.max_sessions,
        empty_annotations = %config.empty_annotations,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    uploader.abort();
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/app", get(app_page))
        .route("/about", get(about_page))
        .route("/result", get(result_page))
        .route("/recipe", post(submit_recipe))
        .route("/review/toggle", post(review_toggle))
        .route("/review/accept", post(review_accept))
        .route("/review/decline", post(review_decline))
        .route("/review/dismiss", post(review_dismiss))
        .route("/review/reveal-next", post(review_reveal_next))
        .route("/review/reveal-all", post(review_reveal_all))
        .route("/review/finish", post(review_finish))
        .route("/tour/start", post(tour_start))
        .route("/tour/next", post(tour_next))
        .route("/tour/close", post(tour_close))
        .route("/prefs/theme", post(prefs_theme))
        .route("/prefs/mode", post(prefs_mode))
        .route("/api/board", get(api_board))
        .route("/api/stats", get(api_stats))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// [`KeyValueStore`] over the request's `Cookie` header. Writes become
/// `Set-Cookie` headers on the response, and only for values that changed.
#[derive(Debug, Default)]
struct CookieStore {
    incoming: HashMap<String, String>,
    outgoing: BTreeMap<String, Option<String>>,
}

impl CookieStore {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut incoming = HashMap::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse(raw).flatten() {
                incoming.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
        Self {
            incoming,
            outgoing: BTreeMap::new(),
        }
    }

    fn set_cookie_headers(&self) -> Vec<(HeaderName, String)> {
        self.outgoing
            .iter()
            .map(|(name, value)| {
                let cookie = match value {
                    Some(value) => Cookie::build((name.clone(), value.clone()))
                        .path("/")
                        .max_age(cookie::time::Duration::seconds(COOKIE_MAX_AGE_SECS))
                        .same_site(SameSite::Lax)
                        .build(),
                    None => Cookie::build((name.clone(), String::new()))
                        .path("/")
                        .max_age(cookie::time::Duration::ZERO)
                        .build(),
                };
                (header::SET_COOKIE, cookie.to_string())
            })
            .collect()
    }
}

impl KeyValueStore for CookieStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.outgoing.get(key) {
            Some(value) => value.clone(),
            None => self.incoming.get(key).cloned(),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if value.len() > MAX_COOKIE_VALUE_LEN {
            return Err(ConfigError::ValueTooLarge {
                key: key.to_string(),
                len: value.len(),
                limit: MAX_COOKIE_VALUE_LEN,
            });
        }
        if self.incoming.get(key).map(String::as_str) == Some(value) {
            self.outgoing.remove(key);
        } else {
            self.outgoing.insert(key.to_string(), Some(value.to_string()));
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if self.incoming.contains_key(key) {
            self.outgoing.insert(key.to_string(), None);
        } else {
            self.outgoing.remove(key);
        }
    }
}

/// One request's view of the caller: cookie-backed settings plus the
/// server-side session keyed by their user id.
struct Visit {
    store: CookieStore,
    config: AppConfig,
    handle: SessionHandle,
}

impl Visit {
    fn open(state: &AppState, headers: &HeaderMap) -> Self {
        let store = CookieStore::from_headers(headers);
        let mut config = AppConfig::load(&store);
        let user_id = config.ensure_user_id().to_string();
        let handle = state.session(&user_id);
        handle.lock().sync_mode(config.mode);
        Self {
            store,
            config,
            handle,
        }
    }

    fn cookie_headers(mut self) -> CookieHeaders {
        if let Err(err) = self.config.save(&mut self.store) {
            warn!(error = %err, "failed to persist settings");
        }
        AppendHeaders(self.store.set_cookie_headers())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
enum GuideStep {
    #[default]
    Recipe,
    Waiting,
    Marking,
    Done,
}

impl GuideStep {
    fn position(self) -> usize {
        match self {
            GuideStep::Recipe => 0,
            GuideStep::Waiting => 1,
            GuideStep::Marking => 2,
            GuideStep::Done => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone)]
struct Notice {
    kind: NoticeKind,
    title: String,
    body: String,
}

impl Notice {
    fn error(body: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            title: "Error".to_string(),
            body: body.into(),
        }
    }

    fn recipe_arrived() -> Self {
        Self {
            kind: NoticeKind::Success,
            title: "Your new recipe is here!".to_string(),
            body: "Can you identify the changes? Click on the words you think are new!".to_string(),
        }
    }
}

struct Session {
    user_id: String,
    step: GuideStep,
    mode: ReviewMode,
    board: Option<ReviewBoard>,
    original_recipe: String,
    improvement_level: u8,
    notice: Option<Notice>,
    tour: Tour,
    tour_stage: TourStage,
    /// Board came from the tour's demo recipe.
    demo: bool,
    link: Option<BackendLink>,
}

impl Session {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            step: GuideStep::Recipe,
            mode: ReviewMode::default(),
            board: None,
            original_recipe: String::new(),
            improvement_level: 0,
            notice: None,
            tour: Tour::default(),
            tour_stage: TourStage::NotStarted,
            demo: false,
            link: None,
        }
    }

    fn reset(&mut self) {
        self.step = GuideStep::Recipe;
        self.board = None;
        self.original_recipe.clear();
        self.demo = false;
    }

    /// Switching granularity replaces the board; review state is not carried over.
    fn sync_mode(&mut self, mode: ReviewMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        if self.demo {
            return;
        }
        if let Some(board) = &self.board {
            self.board = Some(board.remodeled(mode));
        }
    }

    fn load_demo(&mut self, options: &BoardOptions) {
        let (text, annotations) = demo_recipe();
        let options = BoardOptions {
            celebration: Arc::new(NoCelebration),
            ..options.clone()
        };
        self.board = Some(ReviewBoard::new(text, ReviewMode::Word, annotations, options));
        self.step = GuideStep::Marking;
        self.original_recipe.clear();
        self.notice = None;
        self.demo = true;
    }

    fn shown_step(&self) -> GuideStep {
        match (&self.board, self.step) {
            (Some(board), GuideStep::Marking) if board.can_submit() => GuideStep::Done,
            (_, step) => step,
        }
    }
}

fn receive_response(session: &mut Session, response: BackendResponse, options: &BoardOptions) {
    if session.demo {
        debug!(user = %session.user_id, "ignoring recipe that arrived during the tour demo");
        return;
    }
    if session.step != GuideStep::Waiting {
        debug!(user = %session.user_id, step = ?session.step, "recipe arrived outside of a request");
    }
    let board = ReviewBoard::new(
        response.example_recipe,
        session.mode,
        response.annotations,
        options.clone(),
    );
    info!(
        user = %session.user_id,
        board = board.id(),
        changes = board.annotated().len(),
        "improved recipe received"
    );
    session.board = Some(board);
    session.demo = false;
    session.step = GuideStep::Marking;
    session.notice = Some(Notice::recipe_arrived());
}

fn link_failed(session: &mut Session, err: &LinkError) {
    if session.step != GuideStep::Waiting {
        return;
    }
    warn!(user = %session.user_id, error = %err, "recipe request failed");
    session.reset();
    session.notice = Some(Notice::error(CONNECTION_FAILED));
}

fn ensure_link(state: &AppState, handle: &SessionHandle, session: &mut Session) {
    if session.link.is_some() {
        return;
    }
    let Some(url) = state.config.backend_ws_url.clone() else {
        return;
    };
    let weak = Arc::downgrade(handle);
    let options = state.board_options.clone();
    let on_message = {
        let weak = weak.clone();
        Arc::new(move |response: BackendResponse| {
            if let Some(handle) = weak.upgrade() {
                receive_response(&mut handle.lock(), response, &options);
            }
        })
    };
    let on_error = Arc::new(move |err: &LinkError| {
        if let Some(handle) = weak.upgrade() {
            link_failed(&mut handle.lock(), err);
        }
    });
    session.link = Some(BackendLink::spawn(
        url,
        ReconnectPolicy::Fixed(state.config.reconnect_delay),
        LinkHandlers {
            on_message,
            on_error,
        },
    ));
}

fn request_improvement(
    state: &AppState,
    handle: &SessionHandle,
    session: &mut Session,
    recipe: String,
    level: u8,
) {
    if recipe.chars().count() < MIN_RECIPE_LEN {
        session.notice = Some(Notice::error(RECIPE_TOO_SHORT));
        return;
    }
    let level = level.min(MAX_IMPROVEMENT_LEVEL);
    session.improvement_level = level;
    ensure_link(state, handle, session);
    let request = BackendRequest::new(recipe.as_str(), level, session.user_id.as_str());
    let sent = match &session.link {
        Some(link) => link.send(&request),
        None => Err(LinkError::NotOpen),
    };
    match sent {
        Ok(()) => {
            info!(
                user = %session.user_id,
                level,
                rules = request.number_of_rules,
                "recipe sent for improvement"
            );
            session.board = None;
            session.demo = false;
            session.original_recipe = recipe;
            session.step = GuideStep::Waiting;
            session.notice = None;
        }
        Err(err) => {
            warn!(user = %session.user_id, error = %err, "backend unavailable");
            session.reset();
            session.notice = Some(Notice::error(CONNECTION_FAILED));
        }
    }
}

fn schedule_clear(session: Weak<Mutex<Session>>, ticket: ClearTicket) {
    tokio::spawn(async move {
        tokio::time::sleep_until(tokio::time::Instant::from_std(ticket.due)).await;
        let Some(handle) = session.upgrade() else {
            return;
        };
        let mut guard = handle.lock();
        if let Some(board) = guard.board.as_mut() {
            if board.expire(ticket) {
                debug!(index = ticket.index, "miss cleared");
            }
        }
    });
}

/// Finishes the current board; returns where to send the browser.
fn finish_review(state: &AppState, session: &mut Session, config: &mut AppConfig) -> &'static str {
    let Some(board) = session.board.as_ref() else {
        return APP_PATH;
    };
    if session.demo {
        config.mark_tour_completed();
        session.tour_stage = TourStage::Done;
        session.tour = Tour::default();
        session.reset();
        info!(user = %session.user_id, "tour completed");
        return RESULT_PATH;
    }
    let context = SubmissionContext::now()
        .with_original(session.original_recipe.clone(), session.improvement_level);
    let reporter = ChannelReporter::new(session.user_id.clone(), state.traces.clone());
    match board.finish(&reporter, context) {
        Ok(()) => {
            session.reset();
            session.notice = None;
            RESULT_PATH
        }
        Err(ReviewError::NotFinished { remaining }) => {
            session.notice = Some(Notice::error(format!(
                "{remaining} change(s) still need to be accepted or declined."
            )));
            APP_PATH
        }
        Err(err) => {
            warn!(user = %session.user_id, error = %err, "failed to submit review");
            session.notice = Some(Notice::error(SOMETHING_WRONG));
            APP_PATH
        }
    }
}

fn apply_tour_actions(
    state: &AppState,
    session: &mut Session,
    config: &mut AppConfig,
    actions: Vec<TourAction>,
) -> &'static str {
    let mut queue = VecDeque::from(actions);
    let mut destination = APP_PATH;
    while let Some(action) = queue.pop_front() {
        debug!(user = %session.user_id, ?action, "tour action");
        match action {
            TourAction::Toggle(index) => {
                if let Some(board) = session.board.as_mut() {
                    let _ = board.toggle(index);
                }
            }
            TourAction::Accept(index) => {
                if let Some(board) = session.board.as_mut() {
                    board.accept(index);
                }
            }
            TourAction::Decline(index) => {
                if let Some(board) = session.board.as_mut() {
                    board.decline(index);
                }
            }
            TourAction::LoadDemo => session.load_demo(&state.board_options),
            TourAction::Begin(script) => {
                let mode = session
                    .board
                    .as_ref()
                    .map_or(session.mode, ReviewBoard::mode);
                queue.extend(session.tour.start(script, mode));
            }
            TourAction::SetStage(stage) => session.tour_stage = stage,
            TourAction::FinishReview => destination = finish_review(state, session, config),
        }
    }
    destination
}

/// Runs `apply` against the caller's session and redirects (POST-redirect-GET).
fn update<F>(state: &AppState, headers: &HeaderMap, apply: F) -> Response
where
    F: FnOnce(&SessionHandle, &mut Session, &mut AppConfig) -> &'static str,
{
    let mut visit = Visit::open(state, headers);
    let handle = Arc::clone(&visit.handle);
    let destination = {
        let mut session = handle.lock();
        apply(&handle, &mut *session, &mut visit.config)
    };
    (visit.cookie_headers(), Redirect::to(destination)).into_response()
}

fn with_board(session: &mut Session, apply: impl FnOnce(&mut ReviewBoard)) -> &'static str {
    if let Some(board) = session.board.as_mut() {
        apply(board);
    }
    APP_PATH
}

#[derive(Debug, Deserialize)]
struct RecipeForm {
    recipe: String,
    #[serde(default)]
    improvement_level: u8,
}

#[derive(Debug, Deserialize)]
struct IndexForm {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct BackForm {
    back: Option<String>,
}

impl BackForm {
    fn destination(&self) -> &'static str {
        match self.back.as_deref() {
            Some(APP_PATH) => APP_PATH,
            Some("/about") => "/about",
            _ => HOME_PATH,
        }
    }
}

async fn home(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let visit = Visit::open(&state, &headers);
    let body = render_home(&visit.config);
    (visit.cookie_headers(), Html(body))
}

fn render_home(config: &AppConfig) -> String {
    let chrome = Chrome::new(WebTheme::from_dark_mode(config.dark_mode));
    let other_mode = config.mode.toggled();
    format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="{theme}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Gen-AI Kitchen</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{body_class}">
    <main class="{main_class}">
      <div class="{card_class}">
        <div>
          <p class="{eyebrow_class}">Gen-AI Kitchen v{version}</p>
          <h1 class="{headline_class}">Welcome to Gen-AI Kitchen!</h1>
          <p class="{lede_class}">Send us a recipe, get an improved one back, and find out what changed.</p>
        </div>
        <div class="{cta_group}">
          <a href="/app" class="{button_class}">Start Cooking</a>
          <a href="/about" class="{button_class}">About Us</a>
          <form method="post" action="/prefs/theme">
            <input type="hidden" name="back" value="/" />
            <button type="submit" class="{button_class}">Toggle Dark Mode</button>
          </form>
          <form method="post" action="/prefs/mode">
            <input type="hidden" name="back" value="/" />
            <button type="submit" class="{button_class}">Switch to {other_mode} mode</button>
          </form>
        </div>
      </div>
    </main>
  </body>
</html>"#,
        theme = chrome.theme,
        body_class = chrome.body_class,
        main_class = chrome.main_class,
        card_class = chrome.card_class,
        eyebrow_class = chrome.eyebrow_class,
        headline_class = chrome.headline_class,
        lede_class = chrome.lede_class,
        cta_group = chrome.cta_group_class,
        button_class = chrome.button_class,
        version = env!("CARGO_PKG_VERSION"),
        other_mode = other_mode,
    )
}

async fn about_page(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let visit = Visit::open(&state, &headers);
    let chrome = Chrome::new(WebTheme::from_dark_mode(visit.config.dark_mode));
    let body = render_simple_page(
        chrome,
        "About Us",
        "About Us",
        "Gen-AI Kitchen is a research game: an AI chef rewrites your recipe and you try to spot every change it made. Your accept and decline choices help us understand which improvements cooks actually want.",
        r#"<a href="/app">Start Cooking</a>"#,
        None,
    );
    (visit.cookie_headers(), Html(body))
}

async fn result_page(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let visit = Visit::open(&state, &headers);
    let chrome = Chrome::new(WebTheme::from_dark_mode(visit.config.dark_mode));
    let message = format!(
        "Great, you're all done! Thank you. You'll be redirected to the homepage in {RESULT_REDIRECT_SECS} seconds."
    );
    let body = render_simple_page(
        chrome,
        "All done",
        &message,
        "",
        r#"<a href="/app">Go now!</a>"#,
        Some((RESULT_REDIRECT_SECS, APP_PATH)),
    );
    (visit.cookie_headers(), Html(body))
}

fn render_simple_page(
    chrome: Chrome,
    title: &str,
    headline: &str,
    lede: &str,
    action: &str,
    refresh: Option<(u32, &str)>,
) -> String {
    let refresh_tag = refresh
        .map(|(secs, target)| format!(r#"<meta http-equiv="refresh" content="{secs};url={target}" />"#))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="{theme}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    {refresh_tag}
    <title>Gen-AI Kitchen • {title}</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{body_class}">
    <main class="{main_class}">
      <div class="{card_class}" id="result-page">
        <h1 class="{headline_class}">{headline}</h1>
        <p class="{lede_class}">{lede}</p>
        <div class="{cta_group}"><span class="{button_class}">{action}</span></div>
      </div>
    </main>
  </body>
</html>"#,
        theme = chrome.theme,
        refresh_tag = refresh_tag,
        title = title,
        body_class = chrome.body_class,
        main_class = chrome.main_class,
        card_class = chrome.card_class,
        headline_class = chrome.headline_class,
        headline = headline,
        lede_class = chrome.lede_class,
        lede = lede,
        cta_group = chrome.cta_group_class,
        button_class = chrome.button_class,
        action = action,
    )
}

async fn app_page(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let mut visit = Visit::open(&state, &headers);
    let handle = Arc::clone(&visit.handle);
    let body = {
        let mut session = handle.lock();
        ensure_link(&state, &handle, &mut session);
        if !visit.config.tour_completed && session.tour_stage == TourStage::NotStarted {
            let actions = session.tour.start(TourScript::Form, visit.config.mode);
            apply_tour_actions(&state, &mut session, &mut visit.config, actions);
        }
        if let Some(board) = session.board.as_mut() {
            board.tick(Instant::now());
        }
        let page = render_app(&session, &visit.config);
        session.notice = None;
        page
    };
    (visit.cookie_headers(), Html(body))
}

fn render_app(session: &Session, config: &AppConfig) -> String {
    let theme = WebTheme::from_dark_mode(config.dark_mode);
    let chrome = Chrome::new(theme);
    let mode = session.board.as_ref().map_or(config.mode, ReviewBoard::mode);
    let mut registry = TargetRegistry::default();
    let ids = PageIds {
        recipe_form: registry.register(TargetId::RecipeForm),
        improvement_level: registry.register(TargetId::ImprovementLevel),
        submit_recipe: registry.register(TargetId::SubmitRecipe),
        improved_recipe_wrapper: registry.register(TargetId::ImprovedRecipeWrapper),
        reveal_next: registry.register(TargetId::RevealNextChange),
        reveal_all: registry.register(TargetId::RevealAllChanges),
        all_word_wrapper: TargetId::AllWordWrapper.dom_id(),
        first_word_pop: TargetId::FirstWordPop.dom_id(),
        result_wrapper: TargetId::ResultWrapper.dom_id(),
    };

    let shown = session.shown_step();
    let steps = GUIDE_STEPS
        .iter()
        .enumerate()
        .map(|(position, (title, description))| GuideItem {
            number: position + 1,
            title,
            description,
            current: position == shown.position(),
            finished: position < shown.position(),
        })
        .collect();

    let levels = (0..=MAX_IMPROVEMENT_LEVEL)
        .map(|value| LevelOption {
            value,
            label: improvement_label(value),
            selected: value == session.improvement_level,
        })
        .collect();

    let board = session.board.as_ref().map(|board| {
        registry.register(TargetId::AllWordWrapper);
        registry.register(TargetId::ResultWrapper);
        let first = board.alignment().tokens().next().map(|token| token.index);
        if first.is_some() {
            registry.register(TargetId::FirstWord);
        }
        let lines = board
            .alignment()
            .lines()
            .into_iter()
            .map(|line| {
                line.into_iter()
                    .map(|token| TokenView::new(token, board.status(token.index), first))
                    .collect()
            })
            .collect();
        let explanation = board.explanation().map(|index| {
            registry.register(TargetId::FirstWordPop);
            ExplanationView {
                index,
                text: board.explanation_text(index),
            }
        });
        BoardView {
            lines,
            explanation,
            found: board.resolved_count(),
            total: board.annotated().len(),
            remaining: board.remaining(),
            complete: board.is_complete(),
            skipped: board.is_skipped(),
            can_submit: board.can_submit(),
        }
    });

    let tour = session.tour.current().map(|step| {
        let (position, total) = session.tour.position();
        TourView {
            title: step.title.clone(),
            content: step.content.clone(),
            target: registry.resolve(step.target),
            position,
            total,
            is_last: session.tour.is_last(),
            sticky: step.prevent_close,
        }
    });

    let notice = session.notice.as_ref().map(|notice| NoticeView {
        class: chrome.notice_class(notice.kind),
        title: notice.title.clone(),
        body: notice.body.clone(),
    });

    let connection = session
        .link
        .as_ref()
        .map_or("offline", |link| match link.state() {
            ConnectionState::Open => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Disconnected => "reconnecting",
            ConnectionState::Closed => "offline",
        });

    let template = AppTemplate {
        chrome,
        styles: MARK_STYLES,
        mode_name: mode.as_str(),
        other_mode: config.mode.toggled().as_str(),
        unit: mode.unit_label(false),
        units: mode.unit_label(true),
        steps,
        notice,
        recipe: &session.original_recipe,
        levels,
        level_warning: LEVEL_WARNING,
        show_level_warning: session.improvement_level >= MAX_IMPROVEMENT_LEVEL,
        waiting: session.step == GuideStep::Waiting,
        refresh_secs: WAITING_REFRESH_SECS,
        board,
        tour,
        ids,
        connection,
    };
    template
        .render()
        .unwrap_or_else(|err| render_error_page(chrome, err.to_string()))
}

fn render_error_page(chrome: Chrome, message: impl Into<String>) -> String {
    let message = message.into();
    warn!(%message, "page render failed");
    render_simple_page(
        chrome,
        "Error",
        "Something went wrong",
        &message,
        r#"<a href="/">Back to the menu</a>"#,
        None,
    )
}

async fn submit_recipe(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<RecipeForm>,
) -> Response {
    update(&state, &headers, |handle, session, config| {
        if session.tour.script() == Some(TourScript::Form) {
            let actions = session.tour.close();
            return apply_tour_actions(&state, session, config, actions);
        }
        request_improvement(&state, handle, session, form.recipe, form.improvement_level);
        APP_PATH
    })
}

async fn review_toggle(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<IndexForm>,
) -> Response {
    update(&state, &headers, |handle, session, _| {
        let missed = session.board.as_mut().and_then(|board| match board.toggle(form.index) {
            Toggle::Found => None,
            Toggle::Missed(ticket) => Some(ticket),
        });
        if let Some(ticket) = missed {
            schedule_clear(Arc::downgrade(handle), ticket);
        }
        APP_PATH
    })
}

async fn review_accept(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<IndexForm>,
) -> Response {
    update(&state, &headers, |_, session, _| {
        with_board(session, |board| board.accept(form.index))
    })
}

async fn review_decline(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<IndexForm>,
) -> Response {
    update(&state, &headers, |_, session, _| {
        with_board(session, |board| board.decline(form.index))
    })
}

async fn review_dismiss(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, _| {
        with_board(session, ReviewBoard::dismiss_explanation)
    })
}

async fn review_reveal_next(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, _| {
        with_board(session, |board| {
            let _ = board.reveal_next();
        })
    })
}

async fn review_reveal_all(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, _| {
        with_board(session, |board| {
            let _ = board.reveal_all();
        })
    })
}

async fn review_finish(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, config| {
        finish_review(&state, session, config)
    })
}

async fn tour_start(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, config| {
        session.reset();
        let actions = session.tour.start(TourScript::Form, config.mode);
        apply_tour_actions(&state, session, config, actions)
    })
}

async fn tour_next(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, config| {
        let actions = session.tour.next();
        apply_tour_actions(&state, session, config, actions)
    })
}

async fn tour_close(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    update(&state, &headers, |_, session, config| {
        let actions = session.tour.close();
        apply_tour_actions(&state, session, config, actions)
    })
}

async fn prefs_theme(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<BackForm>,
) -> Response {
    update(&state, &headers, |_, _, config| {
        config.toggle_dark_mode();
        form.destination()
    })
}

async fn prefs_mode(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<BackForm>,
) -> Response {
    update(&state, &headers, |_, session, config| {
        config.switch_mode();
        session.sync_mode(config.mode);
        form.destination()
    })
}

async fn api_board(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let visit = Visit::open(&state, &headers);
    let payload = {
        let session = visit.handle.lock();
        let board = session
            .board
            .as_ref()
            .ok_or_else(|| ApiError::not_found("no recipe loaded yet"))?;
        BoardPayload {
            board_id: board.id(),
            mode: board.mode(),
            step: session.shown_step(),
            text: board.text().to_string(),
            token_count: board.alignment().token_count(),
            statuses: board.statuses().clone(),
            annotated: board.annotated().len(),
            remaining: board.remaining(),
            explanation: board.explanation(),
            complete: board.is_complete(),
            skipped: board.is_skipped(),
            pending_clears: board.pending_clears(),
            demo: session.demo,
            tour_stage: session.tour_stage,
            connection: session.link.as_ref().map(BackendLink::state),
        }
    };
    Ok((visit.cookie_headers(), Json(payload)))
}

async fn api_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.trace_log.stats())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "gelex-web" }))
}

#[derive(Debug, Clone, Serialize)]
struct BoardPayload {
    board_id: u64,
    mode: ReviewMode,
    step: GuideStep,
    text: String,
    token_count: usize,
    statuses: BTreeMap<usize, ReviewStatus>,
    annotated: usize,
    remaining: usize,
    explanation: Option<usize>,
    complete: bool,
    skipped: bool,
    pending_clears: usize,
    demo: bool,
    tour_stage: TourStage,
    connection: Option<ConnectionState>,
}

struct PageIds {
    recipe_form: &'static str,
    improvement_level: &'static str,
    submit_recipe: &'static str,
    improved_recipe_wrapper: &'static str,
    reveal_next: &'static str,
    reveal_all: &'static str,
    all_word_wrapper: &'static str,
    first_word_pop: &'static str,
    result_wrapper: &'static str,
}

struct GuideItem {
    number: usize,
    title: &'static str,
    description: &'static str,
    current: bool,
    finished: bool,
}

struct LevelOption {
    value: u8,
    label: &'static str,
    selected: bool,
}

struct NoticeView {
    class: &'static str,
    title: String,
    body: String,
}

struct TokenView {
    index: usize,
    text: String,
    class: &'static str,
    dom_id: Option<&'static str>,
}

impl TokenView {
    fn new(token: &Token, status: Option<ReviewStatus>, first: Option<usize>) -> Self {
        Self {
            index: token.index,
            text: token.text.clone(),
            class: Highlight::for_status(status).css_class(),
            dom_id: (first == Some(token.index)).then(|| TargetId::FirstWord.dom_id()),
        }
    }
}

struct ExplanationView {
    index: usize,
    text: String,
}

struct BoardView {
    lines: Vec<Vec<TokenView>>,
    explanation: Option<ExplanationView>,
    found: usize,
    total: usize,
    remaining: usize,
    complete: bool,
    skipped: bool,
    can_submit: bool,
}

struct TourView {
    title: String,
    content: String,
    target: Option<&'static str>,
    position: usize,
    total: usize,
    is_last: bool,
    sticky: bool,
}

#[derive(Template)]
#[template(
    source = r##"<!DOCTYPE html>
<html lang="en" data-theme="{{ chrome.theme }}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    {% if waiting %}<meta http-equiv="refresh" content="{{ refresh_secs }}" />{% endif %}
    <title>Gen-AI Kitchen • Find the changes</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    <style>{{ styles|safe }}</style>
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.card_class }}">
        <div class="flex flex-wrap items-center justify-between gap-3">
          <div>
            <p class="{{ chrome.eyebrow_class }}">{{ mode_name }} mode • backend {{ connection }}</p>
            <h1 class="{{ chrome.headline_class }}">Find the changes</h1>
          </div>
          <div class="{{ chrome.cta_group_class }}">
            <a href="/" class="{{ chrome.quiet_button_class }}">Menu</a>
            <form method="post" action="/prefs/mode">
              <input type="hidden" name="back" value="/app" />
              <button type="submit" class="{{ chrome.quiet_button_class }}">Switch to {{ other_mode }} mode</button>
            </form>
            <form method="post" action="/prefs/theme">
              <input type="hidden" name="back" value="/app" />
              <button type="submit" class="{{ chrome.quiet_button_class }}">Toggle Dark Mode</button>
            </form>
            <form method="post" action="/tour/start">
              <button type="submit" class="{{ chrome.quiet_button_class }}">Take the tour</button>
            </form>
          </div>
        </div>

        <ol class="grid gap-3 md:grid-cols-4" aria-label="Progress">
          {% for step in steps %}
          <li class="rounded p-3 border {% if step.current %}border-sky-500 font-semibold{% else %}border-transparent{% endif %}">
            <p>{% if step.finished %}✓{% else %}{{ step.number }}{% endif %}. {{ step.title }}</p>
            <p class="{{ chrome.muted_class }}">{{ step.description }}</p>
          </li>
          {% endfor %}
        </ol>

        {% if let Some(notice) = notice %}
        <div class="{{ notice.class }}" role="alert">
          <p class="font-semibold">{{ notice.title }}</p>
          <p>{{ notice.body }}</p>
        </div>
        {% endif %}

        <div class="grid gap-6 md:grid-cols-2">
          <section class="{{ chrome.panel_class }}">
            <h2 class="text-xl font-semibold">Your Recipe</h2>
            <form method="post" action="/recipe" id="{{ ids.recipe_form }}" class="space-y-4">
              <textarea name="recipe" rows="12" class="{{ chrome.input_class }}" placeholder="Write your recipe here!">{{ recipe }}</textarea>
              <div id="{{ ids.improvement_level }}" class="space-y-1">
                <label class="font-semibold" for="improvement-slider">Improvement level</label>
                <input id="improvement-slider" type="range" name="improvement_level" min="0" max="4" step="1" list="improvement-levels" class="w-full" value="{% for level in levels %}{% if level.selected %}{{ level.value }}{% endif %}{% endfor %}" />
                <datalist id="improvement-levels">
                  {% for level in levels %}<option value="{{ level.value }}" label="{{ level.label }}"></option>{% endfor %}
                </datalist>
                <ul class="flex justify-between {{ chrome.muted_class }}">
                  {% for level in levels %}<li{% if level.selected %} class="font-semibold"{% endif %}>{{ level.label }}</li>{% endfor %}
                </ul>
                {% if show_level_warning %}<p class="{{ chrome.muted_class }}">{{ level_warning }}</p>{% endif %}
              </div>
              <button type="submit" id="{{ ids.submit_recipe }}" class="{{ chrome.button_class }}"{% if waiting %} disabled{% endif %}>Submit</button>
            </form>
          </section>

          <section class="{{ chrome.panel_class }}" id="{{ ids.improved_recipe_wrapper }}">
            <div class="flex items-center justify-between">
              <h2 class="text-xl font-semibold">Improved Recipe</h2>
              <div class="flex gap-2">
                <form method="post" action="/review/reveal-next" id="{{ ids.reveal_next }}">
                  <button type="submit" class="{{ chrome.quiet_button_class }}" title="Reveal one extra {{ unit }}!">?</button>
                </form>
                <form method="post" action="/review/reveal-all" id="{{ ids.reveal_all }}">
                  <button type="submit" class="{{ chrome.quiet_button_class }}" title="Reveal all {{ units }}!">All</button>
                </form>
              </div>
            </div>
            {% if waiting %}
            <p class="{{ chrome.muted_class }}">We are cooking your improved recipe! Please wait!</p>
            {% else if let Some(board) = board %}
            <form method="post" action="/review/toggle" id="{{ ids.all_word_wrapper }}" class="leading-9">
              {% for line in board.lines %}
              <p class="min-h-6">{% for token in line %}<button type="submit" name="index" value="{{ token.index }}"{% if let Some(dom_id) = token.dom_id %} id="{{ dom_id }}"{% endif %} class="token {{ token.class }}">{{ token.text }}</button> {% endfor %}</p>
              {% endfor %}
            </form>
            {% if let Some(explanation) = board.explanation %}
            <div id="{{ ids.first_word_pop }}" class="{{ chrome.info_class }} space-y-2">
              <p>{{ explanation.text }}</p>
              <p>Do you like this change?</p>
              <div class="flex gap-2">
                <form method="post" action="/review/accept"><input type="hidden" name="index" value="{{ explanation.index }}" /><button type="submit" class="{{ chrome.quiet_button_class }}">Accept</button></form>
                <form method="post" action="/review/decline"><input type="hidden" name="index" value="{{ explanation.index }}" /><button type="submit" class="{{ chrome.quiet_button_class }}">Decline</button></form>
                <form method="post" action="/review/dismiss"><button type="submit" class="{{ chrome.quiet_button_class }}">Close</button></form>
              </div>
            </div>
            {% endif %}
            <div id="{{ ids.result_wrapper }}" class="space-y-2">
              {% if board.skipped %}
              <p>No changes were made to this recipe.</p>
              {% else %}
              <p class="{{ chrome.muted_class }}">{{ board.found }} of {{ board.total }} changes resolved{% if board.remaining > 0 %}, {{ board.remaining }} to go{% endif %}.</p>
              {% endif %}
              {% if board.complete %}
              <div class="{{ chrome.success_class }}">All changes found. Well done!</div>
              {% endif %}
              {% if board.can_submit %}
              <form method="post" action="/review/finish">
                <button type="submit" class="{{ chrome.button_class }}">Submit results</button>
              </form>
              {% endif %}
            </div>
            {% else %}
            <p class="{{ chrome.muted_class }}">No recipe yet!</p>
            {% endif %}
          </section>
        </div>

        {% if let Some(tour) = tour %}
        <aside class="{{ chrome.panel_class }} border-2 border-amber-400" aria-label="Tour">
          <p class="{{ chrome.eyebrow_class }}">Tour {{ tour.position }} / {{ tour.total }}{% if let Some(target) = tour.target %} • <a href="#{{ target }}">#{{ target }}</a>{% endif %}</p>
          <h2 class="text-xl font-semibold">{{ tour.title }}</h2>
          <p>{{ tour.content }}</p>
          <div class="flex gap-2">
            <form method="post" action="/tour/next"><button type="submit" class="{{ chrome.button_class }}">{% if tour.is_last %}Finish{% else %}Next{% endif %}</button></form>
            {% if !tour.sticky %}<form method="post" action="/tour/close"><button type="submit" class="{{ chrome.quiet_button_class }}">Skip</button></form>{% endif %}
          </div>
        </aside>
        {% endif %}
      </div>
    </main>
  </body>
</html>"##,
    ext = "html"
)]
struct AppTemplate<'a> {
    chrome: Chrome,
    styles: &'static str,
    mode_name: &'static str,
    other_mode: &'static str,
    unit: &'static str,
    units: &'static str,
    steps: Vec<GuideItem>,
    notice: Option<NoticeView>,
    recipe: &'a str,
    levels: Vec<LevelOption>,
    level_warning: &'static str,
    show_level_warning: bool,
    waiting: bool,
    refresh_secs: u32,
    board: Option<BoardView>,
    tour: Option<TourView>,
    ids: PageIds,
    connection: &'static str,
}
