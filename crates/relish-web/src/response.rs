//! Handler results to HTTP responses.
//!
//! A handler returns a tuple whose first value is a directive string naming
//! how the rest of the tuple is rendered:
//!
//! | directive                  | rest                     |
//! |----------------------------|--------------------------|
//! | `XML`                      | value                    |
//! | `XML PRE`                  | mime, text               |
//! | `XML FILE`                 | mime, path               |
//! | `HTML`                     | text                     |
//! | `HTML FILE`                | path ending in `.html`   |
//! | `JSON`                     | value                    |
//! | `JSON PRE`                 | text                     |
//! | `JSON FILE`                | path                     |
//! | `IMAGE`, `VIDEO`, `MEDIA`  | [subtype], content       |
//! | `... FILE` of those        | [mime or subtype], path  |
//! | `REDIRECT`                 | [code], url              |
//! | `HTTP ERROR`               | code, [message]          |
//! | `HTTP CODE`                | code, [message]          |
//! | `TEMPLATE`                 | template text, data      |
//! | `HEADERS\nName: value...`  | another directive tuple  |
//! | anything containing `.`    | data (template file)     |

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use relish_runtime::encode::{to_json, to_xml};
use relish_runtime::{InterpreterThread, Value};

use crate::error::WebError;
use crate::template;

const TEXT_JSON: &str = "text/json";
const TEXT_HTML: &str = "text/html; charset=utf-8";

fn bad(msg: impl Into<String>) -> WebError {
    WebError::Directive(msg.into())
}

/// Renders a handler's results.
pub fn respond(
    thread: &mut InterpreterThread,
    web_root: &Path,
    results: &[Value],
) -> Result<Response, WebError> {
    let (first, rest) = results
        .split_first()
        .ok_or_else(|| bad("handler returned no directive"))?;
    let directive = first
        .as_str()
        .ok_or_else(|| bad(format!("directive must be a String, got {first}")))?;

    if let Some(header_block) = directive.strip_prefix("HEADERS\n") {
        let headers = parse_headers(header_block)?;
        let mut response = respond(thread, web_root, rest)?;
        // A name given in the block replaces the inner directive's value;
        // repeating it (Set-Cookie) adds further values.
        let mut seen = HashSet::new();
        for (name, value) in headers {
            if seen.insert(name.clone()) {
                response.headers_mut().insert(name, value);
            } else {
                response.headers_mut().append(name, value);
            }
        }
        return Ok(response);
    }

    match directive {
        "XML" => Ok(typed("application/xml", to_xml(thread, &value_at(rest, 0))?)),
        "XML PRE" => Ok(typed(&string_at(rest, 0)?, string_at(rest, 1)?)),
        "XML FILE" => serve_file(web_root, &string_at(rest, 1)?, Some(&string_at(rest, 0)?)),
        "HTML" => {
            let html = string_at(rest, 0)?;
            if !looks_like_html(&html) {
                return Err(bad("HTML response must start with <html or <!DOCTYPE html"));
            }
            Ok(typed(TEXT_HTML, html))
        }
        "HTML FILE" => {
            let path = string_at(rest, 0)?;
            if !path.ends_with(".html") {
                return Err(bad(format!("HTML FILE '{path}' is not an .html file")));
            }
            serve_file(web_root, &path, Some(TEXT_HTML))
        }
        "JSON" => {
            let json = to_json(thread, &value_at(rest, 0))?;
            let text = serde_json::to_string(&json)
                .map_err(|e| bad(format!("JSON encoding failed: {e}")))?;
            Ok(typed(TEXT_JSON, text))
        }
        "JSON PRE" => Ok(typed(TEXT_JSON, string_at(rest, 0)?)),
        "JSON FILE" => serve_file(web_root, &string_at(rest, 0)?, Some(TEXT_JSON)),
        "IMAGE" | "VIDEO" | "MEDIA" => {
            let (subtype, content) = match rest {
                [content] => (None, content),
                [subtype, content, ..] => (subtype.as_str(), content),
                [] => return Err(bad(format!("{directive} needs content"))),
            };
            let mime = media_mime(directive, subtype);
            let body = match content {
                Value::Bytes(b) => b.to_vec(),
                Value::Str(s) => s.as_bytes().to_vec(),
                other => return Err(bad(format!("{directive} content must be Bytes, got {other}"))),
            };
            Ok(typed(&mime, body))
        }
        "IMAGE FILE" | "VIDEO FILE" | "MEDIA FILE" => {
            let kind = directive.trim_end_matches(" FILE");
            match rest {
                [path] => serve_file(web_root, &string(path)?, None),
                [mime, path, ..] => {
                    let mime = media_mime(kind, mime.as_str());
                    serve_file(web_root, &string(path)?, Some(&mime))
                }
                [] => Err(bad(format!("{directive} needs a path"))),
            }
        }
        "REDIRECT" => {
            let (code, url) = match rest {
                [url] => (StatusCode::SEE_OTHER, string(url)?),
                [code, url, ..] => (status_code(code)?, string(url)?),
                [] => return Err(bad("REDIRECT needs a URL")),
            };
            if !code.is_redirection() {
                return Err(bad(format!("REDIRECT code {} is not a redirection", code.as_u16())));
            }
            let location = HeaderValue::from_str(&url)
                .map_err(|_| bad(format!("bad redirect URL '{url}'")))?;
            let mut response = code.into_response();
            response.headers_mut().insert(LOCATION, location);
            Ok(response)
        }
        "HTTP ERROR" | "HTTP CODE" => {
            let code = status_code(rest.first().ok_or_else(|| bad(format!("{directive} needs a code")))?)?;
            if directive == "HTTP ERROR" && !(400..600).contains(&code.as_u16()) {
                return Err(bad(format!("HTTP ERROR code {} is outside 400-599", code.as_u16())));
            }
            let message = match rest.get(1) {
                Some(m) => string(m)?,
                None => code.canonical_reason().unwrap_or("").to_string(),
            };
            Ok(WebError::Status { code, message }.into_response())
        }
        "TEMPLATE" => {
            let source = string_at(rest, 0)?;
            let html = template::render(thread, &source, value_at(rest, 1))?;
            Ok(typed(TEXT_HTML, html))
        }
        path if path.contains('.') => {
            let source = std::fs::read_to_string(safe_path(web_root, path)?)?;
            let html = template::render(thread, &source, value_at(rest, 0))?;
            Ok(typed(TEXT_HTML, html))
        }
        other => Err(bad(format!("unknown response directive '{other}'"))),
    }
}

fn typed(mime: &str, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    if let Ok(v) = HeaderValue::from_str(mime) {
        response.headers_mut().insert(CONTENT_TYPE, v);
    }
    response
}

fn value_at(rest: &[Value], i: usize) -> Value {
    rest.get(i).cloned().unwrap_or(Value::Nil)
}

fn string(v: &Value) -> Result<String, WebError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| bad(format!("expected a String, got {v}")))
}

fn string_at(rest: &[Value], i: usize) -> Result<String, WebError> {
    string(&value_at(rest, i))
}

fn status_code(v: &Value) -> Result<StatusCode, WebError> {
    let n = v
        .as_int()
        .ok_or_else(|| bad(format!("expected a status code, got {v}")))?;
    u16::try_from(n)
        .ok()
        .and_then(|n| StatusCode::from_u16(n).ok())
        .ok_or_else(|| bad(format!("invalid status code {n}")))
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<html")
        || s.starts_with("<HTML")
        || s.get(..14).is_some_and(|p| p.eq_ignore_ascii_case("<!DOCTYPE html"))
}

fn parse_headers(block: &str) -> Result<Vec<(HeaderName, HeaderValue)>, WebError> {
    block
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| bad(format!("header line '{line}' has no ':'")))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| bad(format!("bad header name '{name}'")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| bad(format!("bad value for header '{name}'")))?;
            Ok((name, value))
        })
        .collect()
}

/// `image/png` from `IMAGE` and `png`; a value containing `/` is taken as
/// the whole mime type.
fn media_mime(kind: &str, subtype: Option<&str>) -> String {
    if let Some(s) = subtype.filter(|s| s.contains('/')) {
        return s.to_string();
    }
    match (kind, subtype) {
        ("IMAGE", Some(s)) => format!("image/{s}"),
        ("IMAGE", None) => "image/png".into(),
        ("VIDEO", Some(s)) => format!("video/{s}"),
        ("VIDEO", None) => "video/mp4".into(),
        (_, Some(s)) => format!("application/{s}"),
        (_, None) => "application/octet-stream".into(),
    }
}

/// Joins `rel` onto `root`, refusing absolute paths and `..`.
pub fn safe_path(root: &Path, rel: &str) -> Result<PathBuf, WebError> {
    let rel = Path::new(rel.trim_start_matches('/'));
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(WebError::Forbidden(rel.display().to_string())),
        }
    }
    Ok(out)
}

/// Mime type by file extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => TEXT_HTML,
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => TEXT_JSON,
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Reads a file under `root` and wraps it with `mime`, or a mime guessed
/// from the extension.
pub fn serve_file(root: &Path, rel: &str, mime: Option<&str>) -> Result<Response, WebError> {
    let path = safe_path(root, rel)?;
    let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WebError::NotFound(rel.to_string()),
        _ => WebError::Io(e),
    })?;
    Ok(typed(mime.unwrap_or_else(|| mime_for(&path)), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::SET_COOKIE;
    use relish_runtime::{Runtime, RuntimeConfig};

    fn run(results: Vec<Value>) -> Result<Response, WebError> {
        let rt = Runtime::builder(RuntimeConfig::in_memory()).build().unwrap();
        let mut t = rt.new_thread("", "respond");
        respond(&mut t, Path::new("/nonexistent"), &results)
    }

    fn strs(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::str(s)).collect()
    }

    #[test]
    fn redirect_defaults_to_see_other() {
        let r = run(strs(&["REDIRECT", "/next"])).unwrap();
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(r.headers()[LOCATION], "/next");
        let r = run(vec![Value::str("REDIRECT"), Value::Int(307), Value::str("/login")]).unwrap();
        assert_eq!(r.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[test]
    fn http_error_range() {
        let r = run(vec![Value::str("HTTP ERROR"), Value::Int(418)]).unwrap();
        assert_eq!(r.status(), StatusCode::IM_A_TEAPOT);
        assert!(run(vec![Value::str("HTTP ERROR"), Value::Int(204)]).is_err());
        let r = run(vec![Value::str("HTTP CODE"), Value::Int(204), Value::str("")]).unwrap();
        assert_eq!(r.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn html_must_look_like_html() {
        assert!(run(strs(&["HTML", "<!doctype html><p>x"])).is_ok());
        assert!(run(strs(&["HTML", "<p>x"])).is_err());
    }

    #[test]
    fn headers_wrap_another_directive() {
        let r = run(strs(&["HEADERS\nX-Frame-Options: DENY\nCache-Control: no-store", "JSON PRE", "{}"])).unwrap();
        assert_eq!(r.headers()["x-frame-options"], "DENY");
        assert_eq!(r.headers()[CONTENT_TYPE], TEXT_JSON);
    }

    #[test]
    fn repeated_header_keeps_every_value() {
        let r = run(strs(&[
            "HEADERS\nSet-Cookie: a=1\nSet-Cookie: b=2\nContent-Type: text/plain",
            "JSON PRE",
            "{}",
        ]))
        .unwrap();
        let cookies: Vec<_> = r.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let types: Vec<_> = r.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(types, vec!["text/plain"]);
    }

    #[test]
    fn unknown_directive() {
        assert!(matches!(run(strs(&["SHRUG"])), Err(WebError::Directive(_))));
    }

    #[test]
    fn paths_stay_under_root() {
        let root = Path::new("/srv/web");
        assert_eq!(safe_path(root, "/css/a.css").unwrap(), root.join("css/a.css"));
        assert!(matches!(safe_path(root, "../etc/passwd"), Err(WebError::Forbidden(_))));
    }

    #[test]
    fn media_types() {
        assert_eq!(media_mime("IMAGE", Some("jpeg")), "image/jpeg");
        assert_eq!(media_mime("MEDIA", Some("audio/ogg")), "audio/ogg");
        assert_eq!(mime_for(Path::new("x/site.CSS")), "text/css");
    }
}
