use super::*;
use crate::sync::cache::CacheStore;
use crate::sync::model::format_timestamp;
use pinboard_core::{AuthToken, PinboardClient};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn make_session(server: &MockServer, page_size: u32) -> SyncSession {
    let token = AuthToken::parse("alice:SECRET").unwrap();
    let client = PinboardClient::with_base_url(&server.uri(), token).unwrap();
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let cache = CacheStore::from_pool(pool);
    cache.init().await.unwrap();
    SyncSession::new(Arc::new(
        SyncEngine::new(client, cache).with_page_size(page_size),
    ))
}

fn post(hash: &str, created_at: i64, tags: &str, toread: &str) -> Value {
    json!({
        "href": format!("https://example.com/{hash}"),
        "description": hash,
        "extended": "",
        "hash": hash,
        "time": format_timestamp(created_at),
        "shared": "yes",
        "toread": toread,
        "tags": tags
    })
}

#[tokio::test]
async fn listings_paginate_independently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .and(query_param("start", "0"))
        .and(query_param("tag", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("r", 5, "rust", "no")])))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            post("b", 20, "", "no"),
            post("a", 10, "", "no")
        ])))
        .mount(&server)
        .await;
    let session = make_session(&server, 2).await;
    let all = ListingKey::All;
    let rust = ListingKey::Tag("rust".into());

    assert!(matches!(session.refresh(&all).await.unwrap(), PassOutcome::Applied(_)));
    assert!(matches!(session.refresh(&rust).await.unwrap(), PassOutcome::Applied(_)));

    let all_cursor = session.cursor(&all).await;
    let rust_cursor = session.cursor(&rust).await;
    assert_eq!((all_cursor.offset(), all_cursor.has_more()), (2, true));
    assert_eq!((rust_cursor.offset(), rust_cursor.has_more()), (1, false));
}

#[tokio::test]
async fn overlapping_refresh_is_coalesced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([post("a", 10, "", "no")]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    let key = ListingKey::All;

    let (first, second) = tokio::join!(session.refresh(&key), session.load_more(&key));

    assert!(matches!(first.unwrap(), PassOutcome::Applied(_)));
    assert_eq!(second.unwrap(), PassOutcome::Skipped);
}

#[tokio::test]
async fn load_more_after_short_page_does_no_io() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("a", 10, "", "no")])))
        .expect(1)
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    let key = ListingKey::All;

    session.refresh(&key).await.unwrap();

    assert_eq!(session.load_more(&key).await.unwrap(), PassOutcome::Exhausted);
}

#[tokio::test]
async fn failed_pass_releases_listing_and_keeps_revision() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("a", 10, "", "no")])))
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    let revisions = session.subscribe();
    let key = ListingKey::All;

    assert!(session.refresh(&key).await.is_err());
    assert_eq!(*revisions.borrow(), 0);

    assert!(matches!(session.refresh(&key).await.unwrap(), PassOutcome::Applied(_)));
    assert_eq!(*revisions.borrow(), 1);
}

#[tokio::test]
async fn mutations_bump_revision() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("a", 10, "", "no")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result_code": "done" })))
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    let mut revisions = session.subscribe();

    session.refresh(&ListingKey::All).await.unwrap();
    session.toggle_read("a").await.unwrap();

    assert!(revisions.has_changed().unwrap());
    assert_eq!(*revisions.borrow_and_update(), 2);
}

#[tokio::test]
async fn bookmarks_filter_by_tag_and_read_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            post("c", 30, "rust", "yes"),
            post("b", 20, "rust", "no"),
            post("a", 10, "", "yes")
        ])))
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    session.refresh(&ListingKey::All).await.unwrap();

    let ids = |list: Vec<LocalBookmark>| -> Vec<String> {
        list.into_iter().map(|b| b.remote_id).collect()
    };
    let rust = ListingKey::Tag("rust".into());
    assert_eq!(ids(session.bookmarks(&ListingKey::All, true).await.unwrap()), vec!["c", "a"]);
    assert_eq!(ids(session.bookmarks(&rust, false).await.unwrap()), vec!["c", "b"]);
    assert_eq!(ids(session.bookmarks(&rust, true).await.unwrap()), vec!["c"]);
}

#[tokio::test]
async fn closing_listing_discards_its_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("a", 10, "", "no")])))
        .mount(&server)
        .await;
    let session = make_session(&server, 1).await;
    let key = ListingKey::All;

    session.refresh(&key).await.unwrap();
    assert_eq!(session.cursor(&key).await.offset(), 1);

    session.close_listing(&key).await;
    assert_eq!(session.cursor(&key).await, PaginationCursor::new());
}

#[tokio::test]
async fn tags_are_fetched_once_then_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rust": 3 })))
        .expect(1)
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;

    assert_eq!(session.tags().await.unwrap().len(), 1);
    assert_eq!(session.tags().await.unwrap().len(), 1);
}

#[tokio::test]
async fn clearing_local_data_empties_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("a", 10, "", "no")])))
        .mount(&server)
        .await;
    let session = make_session(&server, 10).await;
    session.refresh(&ListingKey::All).await.unwrap();

    session.clear_local_data().await.unwrap();

    assert!(session.bookmarks(&ListingKey::All, false).await.unwrap().is_empty());
    assert_eq!(session.cursor(&ListingKey::All).await, PaginationCursor::new());
}

#[test]
fn listing_key_from_blank_tag_is_all() {
    assert_eq!(ListingKey::from_tag(None), ListingKey::All);
    assert_eq!(ListingKey::from_tag(Some("  ".into())), ListingKey::All);
    assert_eq!(
        ListingKey::from_tag(Some("rust".into())),
        ListingKey::Tag("rust".into())
    );
    assert_eq!(ListingKey::Tag("rust".into()).to_string(), "tag:rust");
}
