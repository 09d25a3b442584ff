use axum::{http::Method, Extension};
use envconfig::Envconfig;
use school_activities::{
    api::auth::ensure_admin_user, auth::JwtKeys, config::Config, connect_to_db, run_migrations,
};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "school_activities=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::init_from_env()?;
    let keys = JwtKeys::from_base64_secret(&config.jwt_secret, config.token_ttl())?;

    if config.run_migrations {
        run_migrations(&config.db_url).await?;
    }
    let pool = connect_to_db(&config.db_url)?;
    if let Some((email, password)) = config.admin_credentials() {
        ensure_admin_user(&pool, email, password).await?;
    }

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any);
    let app = school_activities::app()
        .layer(Extension(pool))
        .layer(Extension(keys))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}
