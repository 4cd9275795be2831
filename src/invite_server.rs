use core::fmt;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Extension, Router,
};
use tokio::{net::TcpListener, sync::Notify};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    clock::SystemClock,
    config::Config,
    error::{ConfigError, Error, ServerError, StdIoError},
    flows::invitation::{
        InvitationMessageBuilder, InviteEmail, LinkBuilder, MessageBuilder,
        SignedRouteLinkBuilder,
    },
    invite_manager::InviteManager,
    notifier::Notifier,
    r#trait::Clock,
    routes::invitation::accept_invitation_route,
};

pub struct Signals {
    pub stop: Arc<AtomicBool>,
    pub stop_notify: Arc<Notify>,
}

impl Signals {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn clone_stop_notify(&self) -> Arc<Notify> {
        self.stop_notify.to_owned()
    }
}

#[derive(Debug)]
pub enum RequiredProperties {
    Config,
    Notifier,
}

impl fmt::Display for RequiredProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Config => "Config",
                Self::Notifier => "Notifier",
            }
        )
    }
}

/// Routes for the acceptance endpoint, mounted at the path of the configured base url.
pub fn router(invite_manager: Arc<InviteManager>) -> Result<Router, Error> {
    let path = invite_manager.config.get_base_url().path().to_string();
    let mut app = Router::new()
        .route(&path, get(accept_invitation_route))
        .layer(TraceLayer::new_for_http());

    let allowed_origins = invite_manager.config.get_allowed_origins();
    if !allowed_origins.is_empty() {
        let mut origins: Vec<HeaderValue> = Vec::with_capacity(allowed_origins.len());
        for allowed_origin in allowed_origins.iter() {
            match allowed_origin.parse::<HeaderValue>() {
                Ok(origin) => origins.push(origin),
                Err(_) => return Err(ConfigError::InvalidOrigin(allowed_origin.to_owned()).into()),
            }
        }
        let cors = CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_origin(AllowOrigin::list(origins));
        app = app.layer(cors);
    }

    Ok(app.layer(Extension(invite_manager)))
}

#[derive(Default)]
pub struct Builder {
    //required
    config: Option<Config>,
    notifier: Option<Arc<dyn Notifier>>,

    //optional
    clock: Option<Arc<dyn Clock>>,
    link_builder: Option<Box<dyn LinkBuilder>>,
    message_builder: Option<Box<dyn MessageBuilder>>,
    stop: Option<Arc<AtomicBool>>,
    stop_notify: Option<Arc<Notify>>,
}

impl Builder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn link_builder(mut self, link_builder: Box<dyn LinkBuilder>) -> Self {
        self.link_builder = Some(link_builder);
        self
    }

    pub fn message_builder(mut self, message_builder: Box<dyn MessageBuilder>) -> Self {
        self.message_builder = Some(message_builder);
        self
    }

    pub fn stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn stop_notify(mut self, stop_notify: Arc<Notify>) -> Self {
        self.stop_notify = Some(stop_notify);
        self
    }

    pub fn build(self) -> Result<InviteServer, Error> {
        let (config, notifier) = match (self.config, self.notifier) {
            (Some(config), Some(notifier)) => (config, notifier),
            (config, notifier) => {
                let mut missing_properties: Vec<RequiredProperties> = Vec::new();
                if config.is_none() {
                    missing_properties.push(RequiredProperties::Config);
                }
                if notifier.is_none() {
                    missing_properties.push(RequiredProperties::Notifier);
                }
                return Err(ConfigError::MissingProperties(format!(
                    "{:?}",
                    missing_properties
                ))
                .into());
            }
        };
        let link_builder = self.link_builder.unwrap_or_else(|| {
            Box::new(SignedRouteLinkBuilder::new(config.get_invite_lifetime()))
        });
        let message_builder = self
            .message_builder
            .unwrap_or_else(|| Box::new(InvitationMessageBuilder));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let invite_manager = InviteManager::new(
            config,
            clock,
            InviteEmail::new(link_builder, message_builder),
            notifier,
        );
        let signals = Signals {
            stop: self.stop.unwrap_or(Arc::new(AtomicBool::new(false))),
            stop_notify: self.stop_notify.unwrap_or(Arc::new(Notify::new())),
        };
        Ok(InviteServer {
            invite_manager: Arc::new(invite_manager),
            signals,
        })
    }

    /// Builds the server and spawns it onto the current runtime.
    pub async fn start_server(
        self,
    ) -> Result<(Arc<InviteServer>, tokio::task::JoinHandle<Result<(), Error>>), Error> {
        let invite_server = Arc::new(self.build()?);
        let listener = invite_server.bind().await?;
        let invite_server_ = invite_server.to_owned();
        let handle = tokio::spawn(async move { invite_server_.serve(listener).await });
        Ok((invite_server, handle))
    }
}

pub struct InviteServer {
    pub invite_manager: Arc<InviteManager>,
    pub signals: Signals,
}

impl InviteServer {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub async fn bind(&self) -> Result<TcpListener, Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], self.invite_manager.config.port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Invitation endpoint listening on {}", addr);
                Ok(listener)
            }
            Err(err) => Err(ServerError::Bind(StdIoError(err)).into()),
        }
    }

    /// Serves until `signals.stop()` is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        let app = router(self.invite_manager.to_owned())?;
        let stop = self.signals.stop.to_owned();
        let stop_notify = self.signals.clone_stop_notify();
        let shutdown = async move {
            let notified = stop_notify.notified();
            if !stop.load(Ordering::SeqCst) {
                notified.await;
            }
        };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            return Err(ServerError::Serve(StdIoError(err)).into());
        }
        info!("Invitation endpoint stopped");
        Ok(())
    }
}
