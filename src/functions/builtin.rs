use axum::http::{HeaderValue, StatusCode, Uri, header};
use bytes::Bytes;
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, LazyLock};

use super::names;
use super::registry::{CtxFunc, FunctionTable};
use crate::context::{Request, RequestContext};
use crate::cookies::{self, CookieOptions, Cookies};
use crate::error::CtxError;
use crate::files::{self, ServedFile};
use crate::routing::RouteError;
use crate::session::{FLASH_KEY, FlashMessages, SessionStore};

static BUILTIN: LazyLock<FunctionTable> = LazyLock::new(|| {
    let mut table = FunctionTable::new();
    table.insert_declared::<Option<u16>, ()>(names::ABORT, CtxFunc::fallible(abort));
    table.insert_declared::<(u16, String), ()>(names::REDIRECT, CtxFunc::fallible(redirect));
    table.insert_declared::<(String, Value), ()>(
        names::RENDER_TEMPLATE,
        CtxFunc::fallible(render_template),
    );
    table.insert_declared::<(u16, Bytes), ()>(names::SERVE_DATA, CtxFunc::fallible(serve_data));
    table.insert_declared::<Box<dyn ServedFile>, ()>(names::SERVE_FILE, CtxFunc::fallible(serve_file));
    table.insert_declared::<(String, String), ()>(names::FLASH, CtxFunc::fallible(flash));
    table.insert_declared::<Vec<String>, Vec<String>>(
        names::FLASH_MESSAGES,
        CtxFunc::value(flash_messages),
    );
    table.insert_declared::<(), FlashMessages>(
        names::ALL_FLASH_MESSAGES,
        CtxFunc::value(|ctx: &mut RequestContext, _: ()| all_flash_messages(ctx)),
    );
    table.insert_declared::<(String, bool, Vec<String>), String>(names::URL_FOR, CtxFunc::fallible(url_for));
    table.insert_declared::<(String, String, CookieOptions), ()>(names::COOKIE, CtxFunc::fallible(cookie));
    table.insert_declared::<(), Cookies>(
        names::COOKIES,
        CtxFunc::value(|ctx: &mut RequestContext, _: ()| cookies::parse(ctx.request())),
    );
    table
});

/// The default behaviors every environment starts from.
pub fn builtin() -> FunctionTable {
    BUILTIN.clone()
}

fn status_from(code: u16) -> Result<StatusCode, CtxError> {
    StatusCode::from_u16(code)
        .map_err(|_| CtxError::InvalidArgument(format!("invalid status code {code}")))
}

/// Records the status; `None` leaves the response status untouched.
fn abort(ctx: &mut RequestContext, code: Option<u16>) -> Result<(), CtxError> {
    if let Some(code) = code {
        let status = status_from(code)?;
        ctx.writer_mut().write_header(status);
    }
    Ok(())
}

fn redirect(ctx: &mut RequestContext, (code, location): (u16, String)) -> Result<(), CtxError> {
    if !(300..=308).contains(&code) {
        return Err(CtxError::InvalidArgument(format!(
            "Cannot send a redirect with status code {code}"
        )));
    }
    let status = status_from(code)?;
    let location = resolve_location(ctx.request(), &location);
    let location = HeaderValue::from_str(&location)
        .map_err(|_| CtxError::InvalidArgument(format!("invalid redirect location {location:?}")))?;

    ctx.writer_mut().headers_mut().insert(header::LOCATION, location);
    ctx.release_session()?;
    ctx.writer_mut().write_header(status);
    ctx.writer_mut().write_header_now()?;
    Ok(())
}

/// Relative locations are resolved against the directory of the request path.
fn resolve_location(request: &Request, location: &str) -> String {
    if location.contains("://") || location.starts_with("//") {
        return location.to_string();
    }
    let (target, suffix) = location
        .find(|c| c == '?' || c == '#')
        .map_or((location, ""), |idx| location.split_at(idx));

    let path = request.uri.path();
    let joined = if target.is_empty() {
        path.to_string()
    } else if target.starts_with('/') {
        target.to_string()
    } else {
        let dir = path.rfind('/').map_or("/", |idx| &path[..=idx]);
        format!("{dir}{target}")
    };
    format!("{}{suffix}", clean_path(&joined))
}

/// Resolve `.` and `..` and collapse repeated slashes. A trailing slash is
/// kept.
fn clean_path(path: &str) -> String {
    let mut parts = Vec::new();
    for piece in path.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            piece => parts.push(piece),
        }
    }
    let mut cleaned = format!("/{}", parts.join("/"));
    if path.ends_with('/') && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

fn render_template(ctx: &mut RequestContext, (name, data): (String, Value)) -> Result<(), CtxError> {
    let templator = ctx.app().templator().cloned().ok_or(CtxError::NoTemplator)?;
    // Flashes are popped only once rendering can go ahead
    let flash = all_flash_messages(ctx);
    ctx.release_session()?;

    let (writer, envelope) = ctx.template_parts(&data, flash);
    templator.render(writer, &name, &envelope)?;
    Ok(())
}

fn serve_data(ctx: &mut RequestContext, (code, data): (u16, Bytes)) -> Result<(), CtxError> {
    ctx.release_session()?;
    ctx.write_to_header(Some(code), mime::TEXT_PLAIN.as_ref())?;
    ctx.writer_mut().write_all(&data)?;
    Ok(())
}

fn serve_file(ctx: &mut RequestContext, mut file: Box<dyn ServedFile>) -> Result<(), CtxError> {
    ctx.release_session()?;
    let info = file.stat()?;
    let request = Arc::clone(ctx.request_arc());
    files::serve_content(ctx.writer_mut(), &request, &info, &mut file)?;
    Ok(())
}

fn stored_flashes(session: &dyn SessionStore) -> Option<FlashMessages> {
    session
        .get(FLASH_KEY)
        .and_then(|value| serde_json::from_value(value).ok())
}

fn flash_value(flashes: &FlashMessages) -> Value {
    Value::Object(
        flashes
            .iter()
            .map(|(category, message)| (category.clone(), Value::String(message.clone())))
            .collect(),
    )
}

fn flash(ctx: &mut RequestContext, (category, message): (String, String)) -> Result<(), CtxError> {
    let session = ctx.session_mut().ok_or(CtxError::NoSession)?;
    let mut flashes = stored_flashes(session).unwrap_or_default();
    flashes.insert(category, message);
    session.set(FLASH_KEY, flash_value(&flashes));
    Ok(())
}

fn flash_messages(ctx: &mut RequestContext, categories: Vec<String>) -> Vec<String> {
    let Some(session) = ctx.session_mut() else {
        return Vec::new();
    };
    let Some(mut flashes) = stored_flashes(session) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    flashes.retain(|category, message| {
        if categories.contains(category) {
            found.push(std::mem::take(message));
            false
        } else {
            true
        }
    });
    session.set(FLASH_KEY, flash_value(&flashes));
    found
}

/// Pops every pending flash message out of the session.
fn all_flash_messages(ctx: &mut RequestContext) -> FlashMessages {
    let Some(session) = ctx.session_mut() else {
        return FlashMessages::new();
    };
    let flashes = stored_flashes(session).unwrap_or_default();
    session.delete(FLASH_KEY);
    flashes
}

fn cookie(
    ctx: &mut RequestContext,
    (name, value, options): (String, String, CookieOptions),
) -> Result<(), CtxError> {
    if ctx.writer().written() {
        return Err(CtxError::InvalidArgument(format!(
            "cannot set cookie {name}: headers already sent"
        )));
    }
    let set_cookie = cookies::set_cookie_header(&name, &value, &options)?;
    ctx.writer_mut().headers_mut().append(header::SET_COOKIE, set_cookie);
    Ok(())
}

fn url_for(
    ctx: &mut RequestContext,
    (route, external, params): (String, bool, Vec<String>),
) -> Result<String, CtxError> {
    let failed = |source: Option<RouteError>| CtxError::UrlBuild {
        route: route.clone(),
        params: params.clone(),
        source,
    };

    let Some(found) = ctx.app().routes().get(&route) else {
        return Err(failed(None));
    };
    let url = found.url(&params).map_err(|err| failed(Some(err)))?;
    if !external {
        return Ok(url.to_string());
    }

    let request = ctx.request();
    let Some(host) = request.host() else {
        return Ok(url.to_string());
    };
    let scheme = request.uri.scheme_str().unwrap_or("http");
    let path = url.path_and_query().map_or("/", |pq| pq.as_str());
    let external = Uri::builder()
        .scheme(scheme)
        .authority(host)
        .path_and_query(path)
        .build()
        .map_err(|err| failed(Some(RouteError::from(err))))?;
    Ok(external.to_string())
}
