use std::net::SocketAddr;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum_server::tls_rustls::RustlsConfig;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use classroom::config::{self, Config, ServerConfig};
use classroom::model::role::Permission;
use classroom::security::{self, AccessPolicy};
use classroom::{database, endpoints};

fn gated(routes: Router, policy: AccessPolicy) -> Router {
    routes.route_layer(from_fn_with_state(policy, security::authorize))
}

fn cors(server: &ServerConfig) -> CorsLayer {
    let origins = if server.cors_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(server.cors_origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| tracing::warn!("Ignoring invalid CORS origin {origin}"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_origin(origins)
}

fn router(config: &Config) -> Router {
    use endpoints::{student, teacher};

    // Every group is gated by its own policy; only the matched routes run the gate
    let teacher_routes = gated(
        Router::new()
            .route("/teacher/dashboard", get(teacher::dashboard))
            .route(
                "/teacher/assignments",
                post(teacher::create_assignment).get(teacher::list_assignments),
            )
            .route(
                "/teacher/assignments/{assignment_id}",
                get(teacher::get_assignment),
            )
            .route(
                "/teacher/assignments/{assignment_id}/grade/{student_id}",
                put(teacher::grade_assignment),
            )
            .route(
                "/teacher/polls",
                post(teacher::create_poll).get(teacher::list_polls),
            )
            .route("/teacher/polls/{poll_id}", get(teacher::get_poll))
            .route("/teacher/students", get(teacher::students)),
        AccessPolicy::teacher_only(),
    );

    let teacher_or_admin_routes = gated(
        Router::new()
            .route("/teacher/dashboard-alt", get(teacher::dashboard))
            .route("/teacher/assignments-alt", post(teacher::create_assignment))
            .route("/teacher/polls-alt", post(teacher::create_poll)),
        AccessPolicy::teacher_or_admin(),
    );

    let student_routes = gated(
        Router::new().route("/student/assignments", get(student::assignments)),
        AccessPolicy::student_only(),
    );

    let submit_routes = gated(
        Router::new().route(
            "/student/assignments/{assignment_id}/submit",
            post(student::submit_assignment),
        ),
        AccessPolicy::student_only().with_permissions(&[Permission::SubmitAssignments]),
    );

    let user_routes = gated(
        Router::new()
            .route("/users/me", get(endpoints::me))
            .route("/student/polls", get(student::polls))
            .route("/student/polls/active", get(student::active_polls))
            .route("/student/polls/{poll_id}/results", get(student::poll_results)),
        AccessPolicy::all_roles(),
    );

    let vote_routes = gated(
        Router::new().route("/student/polls/{poll_id}/vote", post(student::vote)),
        AccessPolicy::all_roles().with_permissions(&[Permission::ParticipatePolls]),
    );

    // Public
    let public_routes = Router::new()
        .route("/users/registration", post(endpoints::register))
        .route("/users/login", post(endpoints::login));

    Router::new()
        .merge(teacher_routes)
        .merge(teacher_or_admin_routes)
        .merge(student_routes)
        .merge(submit_routes)
        .merge(user_routes)
        .merge(vote_routes)
        .merge(public_routes)
        .layer(cors(&config.server))
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {
    // Begin logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "classroom=info".into()),
        )
        .init();

    let config = match Config::load().and_then(config::init) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return;
        }
    };

    // Initialize the database, aborting start-up if an error occurs
    if let Err(e) = database::init_database(&config.database).await {
        tracing::error!("{e}");
        return;
    }
    info!("Database initialized");

    let Ok(address) = config.server.address.parse::<SocketAddr>() else {
        tracing::error!("Invalid bind address {}", config.server.address);
        return;
    };

    let app = router(config);

    let served = match (&config.server.tls_cert, &config.server.tls_key) {
        (Some(cert), Some(key)) => {
            if rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .is_err()
            {
                tracing::warn!("A rustls crypto provider was already installed");
            }

            let tls = match RustlsConfig::from_pem_file(cert, key).await {
                Ok(tls) => tls,
                Err(e) => {
                    tracing::error!("Could not load TLS certificate: {e}");
                    return;
                }
            };

            info!("Serving HTTPS on {address}");
            axum_server::bind_rustls(address, tls)
                .serve(app.into_make_service())
                .await
        }
        _ => {
            info!("Serving HTTP on {address}");
            axum_server::bind(address)
                .serve(app.into_make_service())
                .await
        }
    };

    if let Err(e) = served {
        tracing::error!("Server stopped: {e}");
    }
}
