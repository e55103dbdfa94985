use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use ingress_conductor::{self, telemetry, State};
use ingress_conductor::controller::Options;

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Label selector choosing which namespaces belong to the watched set.
    #[arg(
        long = "watch-namespace-label",
        env = "WATCH_NAMESPACE_LABEL",
        value_name = "SELECTOR",
        default_value = "conductor.dev/watched=true"
    )]
    watch_namespace_label: String,

    /// Apply two-way split weight changes through the targeted update path
    /// instead of a full configuration reload.
    #[arg(
        long = "enable-dynamic-weight-reload",
        env = "ENABLE_DYNAMIC_WEIGHT_RELOAD"
    )]
    enable_dynamic_weight_reload: bool,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&metrics, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let args: Arguments = Arguments::parse();

    let state = State::new(Options {
        watch_namespace_label: args.watch_namespace_label,
        dynamic_weight_reload: args.enable_dynamic_weight_reload,
    });
    let controller = ingress_conductor::run(state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind("0.0.0.0:8080")?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implement graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
