use std::env;
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use wsgid::{Application, DispatchMode, RequestContext, Server, ServerError, StartResponse};

const DEFAULT_BIND: &str = "0.0.0.0:8888";

/// The built-in demo application, reachable as `demo:hello`.
struct Hello;

impl Application for Hello {
    fn call(
        &self,
        ctx: &mut RequestContext,
        start: &mut StartResponse,
    ) -> Result<Vec<Vec<u8>>, ServerError> {
        start.start(
            "200 OK",
            vec![("Content-Type".to_owned(), "text/plain".to_owned())],
        )?;
        Ok(vec![format!("Hello from {}\n", ctx.path).into_bytes()])
    }
}

// There is no runtime module loading here; application names resolve
// against this compiled-in table.
fn resolve_app(spec: &str) -> Option<Arc<dyn Application>> {
    match spec {
        "demo:hello" => Some(Arc::new(Hello)),
        _ => None,
    }
}

fn usage() -> ! {
    eprintln!("usage: wsgid [--fork] [--bind HOST:PORT] module:callable");
    eprintln!();
    eprintln!("  --fork            fork a worker process per connection");
    eprintln!("                    (default: single-threaded poll loop)");
    eprintln!("  --bind HOST:PORT  listen address (default: {DEFAULT_BIND})");
    eprintln!();
    eprintln!("available applications: demo:hello");
    process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut mode = DispatchMode::Readiness;
    let mut bind = DEFAULT_BIND.to_owned();
    let mut app_spec: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fork" => mode = DispatchMode::Forking,
            "--bind" => match args.next() {
                Some(addr) => bind = addr,
                None => usage(),
            },
            _ if arg.starts_with('-') => usage(),
            _ if app_spec.is_some() => usage(),
            _ => app_spec = Some(arg),
        }
    }

    let Some(spec) = app_spec else {
        eprintln!("error: provide an application as module:callable");
        usage();
    };
    let Some(app) = resolve_app(&spec) else {
        eprintln!("error: unknown application {spec:?}");
        usage();
    };

    let mut server = match Server::bind(&bind) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("error: could not bind {bind}: {err}");
            process::exit(1);
        }
    };
    server.set_app(app);

    if let Err(err) = server.serve_forever(mode) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
