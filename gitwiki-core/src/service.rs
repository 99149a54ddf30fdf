//! `SiteService` ties the document store, build pipeline and edit
//! coordinator together behind the operations the HTTP layer calls.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::builder::StaticBuilder;
use crate::config::Config;
use crate::directory::build_directory;
use crate::documents::DocumentStore;
use crate::edit::{ensure_route_accessible, EditCoordinator};
use crate::error::SiteError;
use crate::layout::{LayoutCache, LayoutOptions};
use crate::markdown::{MarkdownRenderer, RenderResult, Renderer};
use crate::page::{PageData, PageTemplates, SiteContext};
use crate::paths::{
    ensure_home_doc, html_path_from, is_directory_route, normalize_rel_path, route_from_path,
    sanitize_route, with_base, PathError, DIRECTORY_OUTPUT, DIRECTORY_ROUTE, FORBIDDEN_OUTPUT,
    NOT_FOUND_OUTPUT,
};
use crate::search::SearchCatalog;
use crate::vcs::{CallContext, Commit, GitRepository, VcsGateway};

/// Where a request should land, as computed by
/// [`SiteService::canonical_redirect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTarget {
    pub target: String,
    /// The request names the home document explicitly.
    pub is_alias: bool,
    pub redirect: bool,
}

/// A request path with the base URL removed.
#[derive(Debug)]
struct RequestPath {
    original: String,
    /// Absolute route relative to the base URL.
    relative: String,
    /// `relative` without surrounding slashes or `.html` suffix.
    candidate: String,
    had_html: bool,
}

pub struct SiteService {
    config: Arc<Config>,
    home_doc: String,
    base_url: String,
    vcs: Arc<dyn VcsGateway>,
    documents: Arc<DocumentStore>,
    search: Arc<SearchCatalog>,
    templates: Arc<dyn PageTemplates>,
    builder: Arc<StaticBuilder>,
    editor: EditCoordinator,
}

impl SiteService {
    pub fn new(
        config: Config,
        vcs: Arc<dyn VcsGateway>,
        renderer: Arc<dyn Renderer>,
        templates: Arc<dyn PageTemplates>,
    ) -> Self {
        let config = Arc::new(config);
        let home_doc = ensure_home_doc(&config.home_doc);
        let base_url = config.normalized_base_url();

        let documents = Arc::new(DocumentStore::new(vcs.clone(), renderer, &home_doc));
        let layout = Arc::new(LayoutCache::new());
        let search = Arc::new(SearchCatalog::new());
        let site = SiteContext::new(
            &config.site_name,
            &home_doc,
            &base_url,
            config.editable,
            config.live,
        );
        let layout_options = LayoutOptions {
            ignore_header: config.ignore_header,
            ignore_footer: config.ignore_footer,
            server_footer: config.server_footer.clone(),
        };
        let builder = Arc::new(StaticBuilder::new(
            documents.clone(),
            layout,
            layout_options,
            search.clone(),
            templates.clone(),
            site,
            config.output_dir(),
            config.theme_dir(),
        ));
        let editor = EditCoordinator::new(
            config.clone(),
            vcs.clone(),
            documents.clone(),
            builder.clone(),
        );

        Self {
            config,
            home_doc,
            base_url,
            vcs,
            documents,
            search,
            templates,
            builder,
            editor,
        }
    }

    /// Open (or bootstrap) the configured working tree and wire the default
    /// Markdown renderer.
    pub async fn open(config: Config, templates: Arc<dyn PageTemplates>) -> Result<Self, SiteError> {
        let repo = GitRepository::from_config(&config).await?;
        Ok(Self::new(
            config,
            Arc::new(repo),
            Arc::new(MarkdownRenderer::new()),
            templates,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.documents.repo_dir()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.builder.output_dir().to_path_buf()
    }

    pub fn not_found_document_path(&self) -> PathBuf {
        self.builder.output_dir().join(NOT_FOUND_OUTPUT)
    }

    pub fn forbidden_document_path(&self) -> PathBuf {
        self.builder.output_dir().join(FORBIDDEN_OUTPUT)
    }

    /// Rebuild and atomically publish the whole site.
    pub async fn build_static(&self, ctx: &CallContext) -> Result<(), SiteError> {
        self.builder.build(ctx).await?;
        Ok(())
    }

    /// Pull from the remote and rebuild when anything changed. Returns
    /// whether the working tree moved.
    #[instrument(skip_all)]
    pub async fn pull(&self, ctx: &CallContext) -> Result<bool, SiteError> {
        let _guard = self.editor.lock().await;
        let changed = self.vcs.pull(ctx).await?;
        if changed {
            info!("remote changes pulled, rebuilding");
            self.builder.build(ctx).await?;
        } else {
            debug!("working tree already up to date");
        }
        Ok(changed)
    }

    /// Push local commits. Waits for any running edit so a rollback never
    /// rewinds a commit that was already pushed.
    pub async fn push(&self, ctx: &CallContext) -> Result<(), SiteError> {
        let _guard = self.editor.lock().await;
        self.vcs.push(ctx).await?;
        Ok(())
    }

    fn resolve(&self, path: &str) -> Result<String, SiteError> {
        let rel = normalize_rel_path(path, &self.home_doc)?;
        ensure_route_accessible(&self.config, &self.home_doc, &rel)?;
        Ok(rel)
    }

    pub async fn history(
        &self,
        ctx: &CallContext,
        path: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Commit>, bool), SiteError> {
        let rel = self.resolve(path)?;
        Ok(self.documents.history(ctx, &rel, page, page_size).await?)
    }

    pub async fn diff(
        &self,
        ctx: &CallContext,
        path: &str,
        from: &str,
        to: &str,
    ) -> Result<String, SiteError> {
        let rel = self.resolve(path)?;
        Ok(self.documents.diff(ctx, &rel, from, to).await?)
    }

    /// Raw Markdown source of a document.
    pub async fn load_raw(&self, path: &str) -> Result<Vec<u8>, SiteError> {
        let rel = self.resolve(path)?;
        Ok(self.documents.read(&rel).await?)
    }

    pub async fn save_page(
        &self,
        ctx: &CallContext,
        path: &str,
        content: &[u8],
        message: &str,
        remote_addr: &str,
    ) -> Result<(), SiteError> {
        self.editor
            .save_page(ctx, path, content, message, remote_addr)
            .await
    }

    pub async fn rename_page(
        &self,
        ctx: &CallContext,
        old_path: &str,
        new_path: &str,
        remote_addr: &str,
    ) -> Result<(), SiteError> {
        self.editor
            .rename_page(ctx, old_path, new_path, remote_addr)
            .await
    }

    /// Render unsaved Markdown for the editor preview.
    pub fn render_preview(&self, content: &[u8]) -> Result<RenderResult, SiteError> {
        Ok(self.documents.renderer().render(content)?)
    }

    /// Page data for a document, or the directory listing when `path`
    /// names the directory route.
    pub async fn render_page_data(
        &self,
        ctx: &CallContext,
        path: &str,
    ) -> Result<PageData, SiteError> {
        self.builder.refresh_layout().await?;
        let rel = self.resolve(path)?;
        let layout = self.builder.layout_snapshot();
        let site = self.builder.site();

        if is_directory_route(&rel) {
            let files = self.documents.list_tracked(ctx).await?;
            let pages = self.builder.render_documents(ctx, &files).await?;
            let entries = build_directory(&pages, &self.base_url);
            return Ok(site.directory_page(entries, &layout));
        }

        let page = self.documents.render_document(ctx, &rel).await?;
        Ok(site.document_page(&page, &layout))
    }

    /// Render a complete HTML page on demand.
    pub async fn render_full_page(&self, ctx: &CallContext, path: &str) -> Result<String, SiteError> {
        let data = self.render_page_data(ctx, path).await?;
        Ok(self.templates.render_page(&data)?)
    }

    pub async fn render_not_found(&self, requested_path: &str) -> Result<String, SiteError> {
        self.builder.refresh_layout().await?;
        let layout = self.builder.layout_snapshot();
        let data = self.builder.site().not_found_page(requested_path, &layout);
        Ok(self.templates.render_page(&data)?)
    }

    pub async fn render_forbidden(&self, requested_path: &str) -> Result<String, SiteError> {
        self.builder.refresh_layout().await?;
        let layout = self.builder.layout_snapshot();
        let data = self.builder.site().forbidden_page(requested_path, &layout);
        Ok(self.templates.render_page(&data)?)
    }

    /// Current search index JSON.
    pub fn search_index(&self) -> Arc<str> {
        self.search.resolve(self.builder.output_dir())
    }

    fn analyze(&self, request_path: &str) -> Option<RequestPath> {
        let original = match request_path.trim() {
            "" => "/".to_string(),
            _ => request_path.to_string(),
        };
        let clean = sanitize_route(&original);

        let base = self.base_url.trim_matches('/');
        let relative = if base.is_empty() {
            clean
        } else {
            let prefix = format!("/{}", base);
            if clean == prefix {
                "/".to_string()
            } else {
                clean.strip_prefix(&prefix)?.strip_prefix('/').map(|rest| format!("/{}", rest))?
            }
        };

        let mut candidate = relative.trim_matches('/').to_string();
        let had_html = candidate.to_lowercase().ends_with(".html");
        if had_html {
            candidate.truncate(candidate.len() - ".html".len());
        }
        Some(RequestPath {
            original,
            relative,
            candidate,
            had_html,
        })
    }

    fn outside_base(request_path: &str) -> SiteError {
        PathError::InvalidPath(format!("{} is outside the site base", request_path)).into()
    }

    /// Document path addressed by an HTTP request, suitable for
    /// [`render_full_page`](Self::render_full_page).
    pub fn request_document(&self, request_path: &str) -> Result<String, SiteError> {
        let info = self
            .analyze(request_path)
            .ok_or_else(|| Self::outside_base(request_path))?;
        if info.relative == DIRECTORY_ROUTE {
            return Ok(DIRECTORY_ROUTE.trim_start_matches('/').to_string());
        }
        Ok(info.candidate)
    }

    /// Canonical location for a request. `None` when the request lies
    /// outside the configured base URL.
    pub async fn canonical_redirect(
        &self,
        request_path: &str,
    ) -> Result<Option<CanonicalTarget>, SiteError> {
        let Some(info) = self.analyze(request_path) else {
            return Ok(None);
        };
        let root = with_base(&self.base_url, "/");
        let fixed = |target: String| {
            let redirect = info.original != target;
            Some(CanonicalTarget {
                target,
                is_alias: false,
                redirect,
            })
        };

        if info.relative == DIRECTORY_ROUTE {
            return Ok(fixed(with_base(&self.base_url, DIRECTORY_ROUTE)));
        }
        if info.relative.eq_ignore_ascii_case("/index") {
            return Ok(fixed(root));
        }
        if info.had_html && matches!(info.candidate.to_lowercase().as_str(), "" | "index") {
            return Ok(fixed(root));
        }

        let rel = normalize_rel_path(&info.candidate, &self.home_doc)?;
        let route = route_from_path(&rel, &self.home_doc);
        let target = with_base(&self.base_url, &route);
        let is_alias = route == "/" && !info.candidate.is_empty();
        let redirect = info.original != target && self.documents.exists(&rel).await?;
        Ok(Some(CanonicalTarget {
            target,
            is_alias,
            redirect,
        }))
    }

    /// Published HTML file for a request path.
    pub fn static_document_path(&self, request_path: &str) -> Result<PathBuf, SiteError> {
        let info = self
            .analyze(request_path)
            .ok_or_else(|| Self::outside_base(request_path))?;
        let output = self.builder.output_dir();
        if info.relative == "/" {
            return Ok(output.join("index.html"));
        }
        if info.relative == DIRECTORY_ROUTE {
            return Ok(output.join(DIRECTORY_OUTPUT));
        }
        let rel = normalize_rel_path(&info.candidate, &self.home_doc)?;
        let html = html_path_from(&rel, &self.home_doc);
        let mut path = output.to_path_buf();
        path.extend(html.split('/'));
        Ok(path)
    }

    /// Published non-HTML file (theme asset, image, attachment) addressed by
    /// a request. `None` for page routes and requests outside the base URL.
    pub fn static_asset_path(&self, request_path: &str) -> Option<PathBuf> {
        let info = self.analyze(request_path)?;
        if info.had_html || info.candidate.is_empty() {
            return None;
        }
        let name = info.candidate.rsplit('/').next().unwrap_or_default();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {}
            _ => return None,
        }
        let mut path = self.builder.output_dir().to_path_buf();
        path.extend(info.candidate.split('/'));
        Some(path)
    }

    /// Reject requests for private routes when serving live.
    pub fn ensure_request_accessible(&self, request_path: &str) -> Result<(), SiteError> {
        if !self.config.live {
            return Ok(());
        }
        let info = self
            .analyze(request_path)
            .ok_or_else(|| Self::outside_base(request_path))?;
        let route = if info.relative == "/" || info.relative == DIRECTORY_ROUTE {
            info.relative
        } else {
            let rel = normalize_rel_path(&info.candidate, &self.home_doc)?;
            route_from_path(&rel, &self.home_doc)
        };
        if self.config.is_path_private(&route) {
            return Err(PathError::ForbiddenRoute(route).into());
        }
        Ok(())
    }
}
