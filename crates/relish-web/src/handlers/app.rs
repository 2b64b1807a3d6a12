//! Application traffic: static assets, then routed multi-method calls.

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use relish_runtime::RuntimeError;

use crate::binding::{self, RequestArgs};
use crate::error::WebError;
use crate::response;
use crate::routing::{self, Route};
use crate::state::AppState;

/// Largest accepted form body.
const MAX_FORM_BYTES: usize = 32 * 1024 * 1024;

/// Fallback handler for every path on the app port.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Result<Response, WebError> {
    let segments = routing::segments(request.uri().path())?;

    if routing::is_static(&segments) {
        let rel = format!("static/{}", segments.join("/"));
        let path = response::safe_path(&state.config.web_root, &rel)?;
        let is_icon = segments.len() == 1 && segments[0] == "favicon.ico";
        if !is_icon || tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let root = state.config.web_root.clone();
            return blocking(move || response::serve_file(&root, &rel, None)).await;
        }
    }

    let route = routing::resolve(state.runtime.methods(), &state.config.root_package, &segments)
        .ok_or_else(|| WebError::NotFound(request.uri().path().to_string()))?;
    tracing::debug!(package = %route.package, method = %route.name, "routed");

    let args = gather(route.positional.clone(), request).await?;
    blocking(move || run(&state, route, args)).await
}

async fn blocking<F>(f: F) -> Result<Response, WebError>
where
    F: FnOnce() -> Result<Response, WebError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        Err(WebError::Runtime(RuntimeError::Panicked {
            message: e.to_string(),
        }))
    })
}

/// Query string, url-encoded body and multipart fields.
async fn gather(positional: Vec<String>, request: Request) -> Result<RequestArgs, WebError> {
    let mut args = RequestArgs::new(positional);
    if let Some(query) = request.uri().query() {
        args.add_urlencoded(query.as_bytes());
    }
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let body = axum::body::to_bytes(request.into_body(), MAX_FORM_BYTES)
            .await
            .map_err(|e| WebError::BadRequest(format!("unreadable form body: {e}")))?;
        args.add_urlencoded(&body);
    } else if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| WebError::BadRequest(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| WebError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let is_file = field.file_name().is_some();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| WebError::BadRequest(e.body_text()))?;
            if is_file {
                args.files.insert(name, bytes.to_vec());
            } else {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                args.keywords.entry(name).or_default().push(text);
            }
        }
    }
    Ok(args)
}

/// Runs one request on a fresh interpreter thread inside a transaction.
fn run(state: &AppState, route: Route, args: RequestArgs) -> Result<Response, WebError> {
    let label = format!("web {}.{}", route.package, route.name);
    let mut thread = state.runtime.new_thread(&route.package, &label);
    let web_root = state.config.web_root.as_path();

    // Web-level failures still have to unwind the transaction, so they are
    // parked here and stood in for by a runtime error.
    let mut parked: Option<WebError> = None;
    let outcome = thread.run_guarded(|t| {
        t.begin()?;
        let values = park(&mut parked, binding::bind(t, route.multi, &args))?;
        let results = t.call_multi_method(route.multi, values)?;
        park(&mut parked, response::respond(t, web_root, &results))
    });
    match outcome {
        Ok(response) => Ok(response),
        Err(e) => Err(parked.take().unwrap_or(WebError::Runtime(e))),
    }
}

fn park<T>(slot: &mut Option<WebError>, result: Result<T, WebError>) -> Result<T, RuntimeError> {
    match result {
        Ok(v) => Ok(v),
        Err(WebError::Runtime(e)) => Err(e),
        Err(other) => {
            let stand_in = RuntimeError::InvalidArgument(other.to_string());
            *slot = Some(other);
            Err(stand_in)
        }
    }
}
