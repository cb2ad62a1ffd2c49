//! Collection hook around the site's page router.
//!
//! The decision runs once the inner service has composed its response; the
//! enqueue happens on a detached task so the visitor never waits on storage.

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::NaiveDate;

use crate::analytics::event::ViewEvent;
use crate::analytics::path::{Verdict, Visitor};
use crate::analytics::sampling::SamplingDecision;
use crate::analytics::settings::ActiveSettings;
use crate::auth::visitor_from_headers;
use crate::state::AppState;

/// Per-request buffer holding at most one sampled view.
#[derive(Debug, Default)]
pub struct CollectionContext {
    pending: Option<ViewEvent>,
    decided: bool,
}

impl CollectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies and samples the request. Only the first call per context
    /// has any effect. Returns the buffered view, if any.
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &mut self,
        method: &Method,
        status: StatusCode,
        path: &str,
        visitor: &Visitor,
        active: &ActiveSettings,
        today: NaiveDate,
        sample: impl FnOnce(u32) -> SamplingDecision,
    ) -> Option<&ViewEvent> {
        if self.decided {
            return self.pending.as_ref();
        }
        self.decided = true;

        if method != Method::GET || status != StatusCode::OK {
            return None;
        }

        let recorded = match active.rules.classify(path, visitor) {
            Verdict::Record(recorded) => recorded,
            Verdict::Skip(reason) => {
                tracing::trace!(path, reason = reason.as_str(), "Page view not eligible");
                return None;
            }
        };

        let decision = sample(active.settings.sampling_rate);
        if !decision.accepted {
            return None;
        }

        self.pending = Some(ViewEvent::new(&recorded, today, decision.weight));
        self.pending.as_ref()
    }

    pub fn take(&mut self) -> Option<ViewEvent> {
        self.pending.take()
    }
}

pub async fn collect_page_views(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let visitor = if method == Method::GET {
        visitor_from_headers(req.headers(), &state.config().jwt_secret)
    } else {
        Visitor::anonymous()
    };

    let response = next.run(req).await;

    let mut ctx = CollectionContext::new();
    let active = state.settings().current();
    ctx.decide(
        &method,
        response.status(),
        &path,
        &visitor,
        &active,
        state.clock().today(),
        |rate| state.sample(rate),
    );

    if let Some(event) = ctx.take() {
        let store = state.store_arc();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.enqueue_view(&event) {
                tracing::warn!(error = %e, path = %event.path, "Failed to enqueue page view");
            }
        });
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::settings::AnalyticsSettings;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    fn active(rate: u32) -> ActiveSettings {
        AnalyticsSettings::with_defaults(rate, 365).into()
    }

    fn always(rate: u32) -> SamplingDecision {
        SamplingDecision {
            accepted: true,
            weight: rate,
        }
    }

    fn never(rate: u32) -> SamplingDecision {
        SamplingDecision {
            accepted: false,
            weight: rate,
        }
    }

    #[test]
    fn buffers_eligible_get_200() {
        let mut ctx = CollectionContext::new();
        let event = ctx
            .decide(
                &Method::GET,
                StatusCode::OK,
                "/blog/post/",
                &Visitor::anonymous(),
                &active(3),
                today(),
                always,
            )
            .cloned();
        assert_eq!(event, Some(ViewEvent::new("/blog/post", today(), 3)));
        assert!(ctx.take().is_some());
        assert!(ctx.take().is_none());
    }

    #[test]
    fn ignores_non_get_and_non_200() {
        let settings = active(1);
        for (method, status) in [
            (Method::POST, StatusCode::OK),
            (Method::HEAD, StatusCode::OK),
            (Method::GET, StatusCode::NOT_FOUND),
            (Method::GET, StatusCode::MOVED_PERMANENTLY),
            (Method::GET, StatusCode::INTERNAL_SERVER_ERROR),
        ] {
            let mut ctx = CollectionContext::new();
            ctx.decide(&method, status, "/a", &Visitor::anonymous(), &settings, today(), always);
            assert!(ctx.take().is_none(), "{method} {status}");
        }
    }

    #[test]
    fn skipped_or_rejected_draws_buffer_nothing() {
        let mut ctx = CollectionContext::new();
        ctx.decide(
            &Method::GET,
            StatusCode::OK,
            "/admin/content",
            &Visitor::anonymous(),
            &active(1),
            today(),
            |_| panic!("sampling must not run for excluded paths"),
        );
        assert!(ctx.take().is_none());

        let mut ctx = CollectionContext::new();
        ctx.decide(&Method::GET, StatusCode::OK, "/a", &Visitor::anonymous(), &active(5), today(), never);
        assert!(ctx.take().is_none());
    }

    #[test]
    fn decides_once_per_context() {
        let mut ctx = CollectionContext::new();
        let settings = active(1);
        ctx.decide(&Method::GET, StatusCode::OK, "/first", &Visitor::anonymous(), &settings, today(), always);
        ctx.decide(&Method::GET, StatusCode::OK, "/second", &Visitor::anonymous(), &settings, today(), always);
        assert_eq!(ctx.take().map(|e| e.path), Some("/first".to_string()));
    }

    #[test]
    fn excluded_roles_apply_to_visitor() {
        let mut settings = AnalyticsSettings::with_defaults(1, 365);
        settings.excluded_roles = vec!["authenticated".into()];
        let settings: ActiveSettings = settings.into();

        let mut ctx = CollectionContext::new();
        ctx.decide(
            &Method::GET,
            StatusCode::OK,
            "/a",
            &Visitor::authenticated(["editor"]),
            &settings,
            today(),
            always,
        );
        assert!(ctx.take().is_none());

        let mut ctx = CollectionContext::new();
        ctx.decide(&Method::GET, StatusCode::OK, "/a", &Visitor::anonymous(), &settings, today(), always);
        assert!(ctx.take().is_some());
    }
}
