// API server implementation using actix-web

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

use crate::api::{auth, middleware, routes, AppState};
use crate::orchestrator::SyncRunner;
use crate::util::env::{env_flag, env_opt, env_parse, env_req};

pub const DEFAULT_API_PORT: u16 = 54704;

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub api_secret: String,
    pub allowed_origins: String,
    /// Start the daemon timers when the server boots.
    pub start_daemon: bool,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match env_opt("API_PORT") {
            Some(raw) => raw.trim().parse().context("Invalid API_PORT")?,
            None => env_parse("PORT", DEFAULT_API_PORT),
        };
        let api_secret = env_req("API_SECRET")?;
        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| format!("http://localhost:{port},http://127.0.0.1:{port}"));

        Ok(Self {
            host,
            port,
            api_secret,
            allowed_origins,
            start_daemon: env_flag("SYNC_DAEMON", false),
        })
    }

    /// Start the HTTP server
    pub async fn run(self, runner: Arc<SyncRunner>) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            daemon = self.start_daemon,
            "Starting NHL sync API server"
        );

        if self.start_daemon {
            runner
                .start_daemon(None)
                .context("starting daemon timers")?;
        }

        let state = web::Data::new(AppState::new(Arc::clone(&runner)));
        let api_secret = self.api_secret.clone();
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(api_secret.clone());

            App::new()
                .app_data(state.clone())
                .wrap(auth)
                .wrap(cors)
                .wrap(compress)
                .wrap(logger)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        runner.cancel();
        Ok(())
    }
}
