//! Scenario tag routing
//!
//! A scenario tagged `@api`, `@auth`, `@db`, `@kafka` or `@ui` gets the
//! matching resource provisioned before its first step. Other tags are
//! ignored so scenarios can carry free-form labels like `@smoke`.

use crate::common::Result;
use crate::resources::{api, auth, db, kafka, ui, ResourceKind};
use crate::scenario::ScenarioContext;

/// Tags that provision a resource
pub const ROUTED_TAGS: [&str; 5] = ["api", "auth", "db", "kafka", "ui"];

/// Resource kind a tag provisions, if any
///
/// Accepts tags with or without the leading `@`, in any case.
pub fn route(tag: &str) -> Option<ResourceKind> {
    let name = tag.trim().trim_start_matches('@').to_ascii_lowercase();
    if !ROUTED_TAGS.contains(&name.as_str()) {
        return None;
    }
    name.parse().ok()
}

/// Provision the resource for `tag`; unknown tags are a no-op
pub async fn handle_before_tag(ctx: &mut ScenarioContext<'_>, tag: &str) -> Result<()> {
    let Some(kind) = route(tag) else {
        tracing::trace!(tag, "Tag has no resource");
        return Ok(());
    };

    match kind {
        ResourceKind::Api => api::ensure_api(ctx).await.map(drop),
        ResourceKind::Auth => auth::ensure_auth(ctx).await.map(drop),
        ResourceKind::Db => db::ensure_db(ctx).await.map(drop),
        ResourceKind::Kafka => kafka::ensure_kafka(ctx).await.map(drop),
        ResourceKind::Ui => ui::ensure_ui(ctx).await.map(drop),
    }
}

/// Resources outlive their tag until the scenario ends
pub async fn handle_after_tag(_ctx: &mut ScenarioContext<'_>, _tag: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::scenario::Harness;

    #[test]
    fn test_route() {
        assert_eq!(route("@api"), Some(ResourceKind::Api));
        assert_eq!(route("KAFKA"), Some(ResourceKind::Kafka));
        assert_eq!(route(" @Ui "), Some(ResourceKind::Ui));
        assert_eq!(route("@smoke"), None);
        assert_eq!(route("@"), None);
    }

    #[tokio::test]
    async fn test_auth_and_ui_are_idempotent() {
        let mut harness = Harness::new(Config::from_table("dev", toml::Table::new()));
        let mut ctx = harness.begin_scenario("tags");

        handle_before_tag(&mut ctx, "@auth").await.unwrap();
        let tokens = ctx.bindings.require_tokens().unwrap();
        handle_before_tag(&mut ctx, "auth").await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&tokens, &ctx.bindings.require_tokens().unwrap()));

        handle_before_tag(&mut ctx, "@ui").await.unwrap();
        handle_before_tag(&mut ctx, "@wip").await.unwrap();
        assert_eq!(
            ctx.registry().enabled(),
            vec![ResourceKind::Ui, ResourceKind::Auth]
        );

        let report = ctx.after_scenario().await;
        assert_eq!(report.released, vec![ResourceKind::Ui, ResourceKind::Auth]);
        assert!(harness.registry().kinds().is_empty());
    }

    #[tokio::test]
    async fn test_api_requires_auth_and_base_url() {
        let mut harness = Harness::new(Config::from_table("dev", toml::Table::new()));
        let mut ctx = harness.begin_scenario("api without config");

        handle_before_tag(&mut ctx, "@api").await.unwrap();
        assert!(ctx.registry().is_enabled(ResourceKind::Auth));
        assert!(ctx.bindings.crds_user.is_none());
        assert!(ctx.bindings.http_client.is_none());

        let err = handle_before_tag(&mut ctx, "@db").await.unwrap_err();
        assert!(err.to_string().contains("db.connection_string or crds.db.connection_string"));
        ctx.after_scenario().await;
    }
}
