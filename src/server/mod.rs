//! HTTP surface: feed files, the OPML index, reader pages and static assets.
//!
//! Requests are matched against [`ROUTES`] in order; the first match
//! handles the request.

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tiny_http::{Header, Method, Response, Server};

use crate::config::Config;
use crate::feed::INDEX_FILE;
use crate::reader;
use crate::store::repo::MessageRepository;

pub struct AppContext {
    pub repo: Box<dyn MessageRepository>,
    pub feed_dir: PathBuf,
    pub static_dir: PathBuf,
    pub listing_limit: usize,
}

impl AppContext {
    pub fn new(repo: Box<dyn MessageRepository>, config: &Config) -> Self {
        Self {
            repo,
            feed_dir: config.feed_dir(),
            static_dir: config.static_dir(),
            listing_limit: config.max_item_per_feed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Reply {
    fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    fn html(body: String) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    fn not_found() -> Self {
        Self::new(404, "text/plain; charset=utf-8", "File not found")
    }
}

enum Seg {
    Lit(&'static str),
    Param,
}

enum Pattern {
    /// Whole decoded path ends with the suffix.
    EndsWith(&'static str),
    /// Exactly these segments; `Param` segments are captured.
    Exact(&'static [Seg]),
    /// First segment matches; the remaining segments are captured.
    Prefix(&'static str),
}

impl Pattern {
    fn capture(&self, segments: &[String]) -> Option<Vec<String>> {
        match self {
            Pattern::EndsWith(suffix) => {
                let last = segments.last()?;
                last.to_ascii_lowercase()
                    .ends_with(suffix)
                    .then(Vec::new)
            }
            Pattern::Exact(pattern) => {
                if pattern.len() != segments.len() {
                    return None;
                }
                let mut params = Vec::new();
                for (seg, value) in pattern.iter().zip(segments) {
                    match seg {
                        Seg::Lit(lit) if lit == value => {}
                        Seg::Lit(_) => return None,
                        Seg::Param => params.push(value.clone()),
                    }
                }
                Some(params)
            }
            Pattern::Prefix(prefix) => match segments.split_first() {
                Some((first, rest)) if first == prefix => Some(rest.to_vec()),
                _ => None,
            },
        }
    }
}

type Handler = fn(&[String], &AppContext) -> Result<Reply>;

struct Route {
    pattern: Pattern,
    handler: Handler,
}

static ROUTES: &[Route] = &[
    // the store file must never be served, whatever directory it sits in
    Route { pattern: Pattern::EndsWith(".db"), handler: reject },
    Route { pattern: Pattern::Exact(&[]), handler: global_listing },
    Route { pattern: Pattern::Exact(&[Seg::Lit(INDEX_FILE)]), handler: subscription_index },
    Route { pattern: Pattern::Exact(&[Seg::Lit("article")]), handler: global_listing },
    Route { pattern: Pattern::Exact(&[Seg::Lit("article"), Seg::Param]), handler: sender_listing },
    Route {
        pattern: Pattern::Exact(&[Seg::Lit("article"), Seg::Param, Seg::Param]),
        handler: article,
    },
    Route { pattern: Pattern::Prefix("static"), handler: static_asset },
    Route { pattern: Pattern::Exact(&[Seg::Param]), handler: feed_document },
];

fn reject(_: &[String], _: &AppContext) -> Result<Reply> {
    Ok(Reply::not_found())
}

fn global_listing(_: &[String], ctx: &AppContext) -> Result<Reply> {
    Ok(Reply::html(reader::render_global_listing(ctx.repo.as_ref())?))
}

fn sender_listing(params: &[String], ctx: &AppContext) -> Result<Reply> {
    let feed_name = &params[0];
    Ok(
        reader::render_sender_listing(ctx.repo.as_ref(), feed_name, ctx.listing_limit)?
            .map(Reply::html)
            .unwrap_or_else(Reply::not_found),
    )
}

fn article(params: &[String], ctx: &AppContext) -> Result<Reply> {
    let (feed_name, guid) = (&params[0], &params[1]);
    Ok(reader::render_article(ctx.repo.as_ref(), feed_name, guid)?
        .map(Reply::html)
        .unwrap_or_else(Reply::not_found))
}

fn subscription_index(_: &[String], ctx: &AppContext) -> Result<Reply> {
    read_file(&ctx.feed_dir.join(INDEX_FILE), "text/x-opml; charset=utf-8")
}

fn feed_document(params: &[String], ctx: &AppContext) -> Result<Reply> {
    let name = &params[0];
    if !name.ends_with(".xml") || !is_plain_name(name) {
        return Ok(Reply::not_found());
    }
    read_file(&ctx.feed_dir.join(name), "application/rss+xml; charset=utf-8")
}

fn static_asset(params: &[String], ctx: &AppContext) -> Result<Reply> {
    let Some(path) = confine(&ctx.static_dir, params) else {
        warn!("refusing static path {params:?}");
        return Ok(Reply::not_found());
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    read_file(&path, mime.essence_str())
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Resolves `segments` under `root`, refusing anything that would leave it.
pub fn confine(root: &Path, segments: &[String]) -> Option<PathBuf> {
    if segments.is_empty() {
        return None;
    }
    let mut path = root.to_path_buf();
    for seg in segments {
        if seg.contains(['/', '\\', '\0']) {
            return None;
        }
        let mut components = Path::new(seg).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) => path.push(c),
            _ => return None,
        }
    }

    let root = root.canonicalize().ok()?;
    let resolved = path.canonicalize().ok()?;
    (resolved.starts_with(&root) && resolved.is_file()).then_some(resolved)
}

fn read_file(path: &Path, content_type: &str) -> Result<Reply> {
    match fs::read(path) {
        Ok(bytes) => Ok(Reply::new(200, content_type, bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Reply::not_found()),
        Err(e) => Err(anyhow!("cannot read {}: {e}", path.display())),
    }
}

/// Decoded, non-empty path segments; `None` for undecodable paths.
pub fn split_path(url: &str) -> Option<Vec<String>> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).ok().map(|c| c.into_owned()))
        .collect()
}

pub fn dispatch(method: &Method, url: &str, ctx: &AppContext) -> Reply {
    if !matches!(method, Method::Get | Method::Head) {
        return Reply::new(405, "text/plain; charset=utf-8", "Method not allowed");
    }
    let Some(segments) = split_path(url) else {
        return Reply::not_found();
    };

    for route in ROUTES {
        if let Some(params) = route.pattern.capture(&segments) {
            return match (route.handler)(&params, ctx) {
                Ok(reply) => reply,
                Err(e) => {
                    error!("{url}: {e:#}");
                    Reply::new(500, "text/plain; charset=utf-8", "Internal server error")
                }
            };
        }
    }
    Reply::not_found()
}

/// Serves requests until the process exits.
pub fn serve(config: &Config, repo: Box<dyn MessageRepository>) -> Result<()> {
    let ctx = AppContext::new(repo, config);
    fs::create_dir_all(&ctx.feed_dir)?;

    let server = Server::http(("0.0.0.0", config.port))
        .map_err(|e| anyhow!("cannot listen on port {}: {e}", config.port))?;
    info!(
        "serving {}/ on http://0.0.0.0:{}/",
        ctx.feed_dir.display(),
        config.port
    );

    for request in server.incoming_requests() {
        let reply = dispatch(request.method(), request.url(), &ctx);
        info!("{} {} -> {}", request.method(), request.url(), reply.status);

        let mut response = Response::from_data(reply.body).with_status_code(reply.status);
        if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type.as_str()) {
            response = response.with_header(header);
        }
        if let Err(e) = request.respond(response) {
            warn!("cannot send response: {e}");
        }
    }
    Ok(())
}
