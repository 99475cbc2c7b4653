use crate::db::{DbError, OrderBy, Select, WhereClause};
use crate::models::{repo, Entity, Track, TrackRoute, VersionMeta};

use super::ApplyContext;

/// Lowercase, with every run of non-alphanumeric characters collapsed to a
/// single `-`.
pub fn title_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Give every changed track whose title slug moved a fresh route.
pub(super) async fn update_track_routes(
    ctx: &ApplyContext<'_>,
    tracks: &[Track],
) -> Result<(), DbError> {
    for track in tracks {
        if track.is_delete {
            continue;
        }
        let (Some(title), Some(owner_id)) = (&track.title, track.owner_id) else {
            continue;
        };
        let mut slug_base = title_slug(title);
        if slug_base.is_empty() {
            slug_base = track.track_id.to_string();
        }

        let current: Option<TrackRoute> =
            repo::current(ctx.tx, TrackRoute::key_for(track.track_id)).await?;
        if current
            .as_ref()
            .is_some_and(|r| r.title_slug == slug_base && r.owner_id == owner_id)
        {
            continue;
        }

        let highest: Option<TrackRoute> = repo::select(
            ctx.tx,
            Select::from(
                TrackRoute::TABLE,
                WhereClause::eq("owner_id", owner_id)
                    .and(WhereClause::eq("title_slug", slug_base.as_str())),
            )
            .order_by(OrderBy::desc("collision_id"))
            .limit(1),
        )
        .await?
        .into_iter()
        .next();

        let collision_id = highest.map_or(0, |r| r.collision_id + 1);
        let slug = if collision_id == 0 {
            slug_base.clone()
        } else {
            format!("{}-{}", slug_base, collision_id)
        };

        tracing::debug!("Track {} routed at {}", track.track_id, slug);
        let route = TrackRoute {
            meta: VersionMeta::current(&ctx.block.hash, ctx.block.number, &track.meta.txhash),
            track_id: track.track_id,
            owner_id,
            slug,
            title_slug: slug_base,
            collision_id,
        };
        repo::flush_versions(ctx.tx, &[route]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::Store;
    use crate::indexer::appliers::testing::block;
    use crate::indexer::prefetch::Prefetched;
    use crate::indexer::signatures::WalletVerifiers;

    fn track(track_id: i64, owner_id: i64, title: &str, number: i64) -> Track {
        let mut track = Track::seed(
            track_id,
            VersionMeta::current(&format!("0xb{}", number), number, "0xt"),
            0,
        );
        track.owner_id = Some(owner_id);
        track.title = Some(title.to_string());
        track
    }

    async fn route(store: &MemoryStore, number: i64, tracks: &[Track]) {
        let b = block(number, &format!("0xb{}", number), 0);
        let prefetched = Prefetched::default();
        let verifiers = WalletVerifiers::default();
        let tx = store.begin().await.unwrap();
        let ctx = ApplyContext::new(tx.as_ref(), &b, &prefetched, &verifiers);
        update_track_routes(&ctx, tracks).await.unwrap();
        drop(ctx);
        tx.commit().await.unwrap();
    }

    async fn current_slug(store: &MemoryStore, track_id: i64) -> Option<String> {
        let tx = store.begin().await.unwrap();
        repo::current::<TrackRoute>(tx.as_ref(), TrackRoute::key_for(track_id))
            .await
            .unwrap()
            .map(|r| r.slug)
    }

    #[test]
    fn test_title_slug() {
        assert_eq!(title_slug("Hello, World!"), "hello-world");
        assert_eq!(title_slug("  --Déjà   Vu-- "), "déjà-vu");
        assert_eq!(title_slug("???"), "");
    }

    #[tokio::test]
    async fn test_same_title_same_owner_collides() {
        let store = MemoryStore::new();
        route(&store, 1, &[track(1, 9, "Intro", 1)]).await;
        route(&store, 2, &[track(2, 9, "intro", 2)]).await;
        route(&store, 3, &[track(3, 8, "Intro", 3)]).await;

        assert_eq!(current_slug(&store, 1).await.as_deref(), Some("intro"));
        assert_eq!(current_slug(&store, 2).await.as_deref(), Some("intro-1"));
        assert_eq!(current_slug(&store, 3).await.as_deref(), Some("intro"));
    }

    #[tokio::test]
    async fn test_rename_moves_route_and_same_title_keeps_it() {
        let store = MemoryStore::new();
        route(&store, 1, &[track(1, 9, "Draft", 1)]).await;
        route(&store, 2, &[track(1, 9, "Draft", 2)]).await;
        assert_eq!(store.rows("track_routes").len(), 1);

        route(&store, 3, &[track(1, 9, "Final Mix", 3)]).await;
        assert_eq!(current_slug(&store, 1).await.as_deref(), Some("final-mix"));
        assert_eq!(store.rows("track_routes").len(), 2);
    }
}
