mod common;

use axum::http::Method;
use chrono::Duration;

use page_analytics::analytics::clock::Clock;
use page_analytics::workers::retention_prune;

use common::app::{spawn_test_app, today};
use common::auth::admin_headers;
use common::fixtures::{seed_counters, wait_for_queue_depth};
use common::http::{assert_status_ok_json, get, request, response_json};

#[tokio::test]
async fn it_visits_flow_through_queue_into_report() {
    let app = spawn_test_app().await;
    let headers = admin_headers(&app);

    for _ in 0..3 {
        get(&app.app, "/blog/post-1", &[]).await;
    }
    get(&app.app, "/about-us", &[]).await;
    assert_eq!(wait_for_queue_depth(app.store(), 4).await, 4);

    let resp = request(&app.app, Method::GET, "/api/admin/analytics/status", None, &headers).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert_eq!(body["data"]["queueDepth"], 4);
    assert_eq!(body["data"]["counterRows"], 0);
    assert!(body["data"]["lastAggregationRun"].is_null());
    assert!(body["data"]["hints"][0].as_str().unwrap().contains("never run"));

    let resp = request(&app.app, Method::POST, "/api/admin/analytics/run", None, &headers).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert_eq!(body["data"]["claimed"], 4);
    assert_eq!(body["data"]["mergedKeys"], 2);
    assert_eq!(body["data"]["aborted"], false);
    assert_eq!(app.store().queue_depth(), 0);

    let resp = request(&app.app, Method::GET, "/api/admin/analytics/report", None, &headers).await;
    let (_, _, body) = response_json(resp).await;
    let rows = body["data"]["rows"]["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["path"], "/blog/post-1");
    assert_eq!(rows[0]["periodTotal"], 3);
    assert_eq!(rows[1]["path"], "/about-us");
    assert_eq!(rows[1]["periodTotal"], 1);

    let resp = request(&app.app, Method::GET, "/api/admin/analytics/status", None, &headers).await;
    let (_, _, body) = response_json(resp).await;
    assert_eq!(body["data"]["queueDepth"], 0);
    assert_eq!(body["data"]["counterRows"], 2);
    assert!(body["data"]["lastAggregationRun"].is_string());
    assert_eq!(body["data"]["hints"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn it_run_with_empty_queue_is_a_noop() {
    let app = spawn_test_app().await;
    let resp = request(
        &app.app,
        Method::POST,
        "/api/admin/analytics/run",
        None,
        &admin_headers(&app),
    )
    .await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert_eq!(body["data"]["batches"], 0);
    assert_eq!(body["data"]["claimed"], 0);
}

#[tokio::test]
async fn it_retention_prune_drops_rows_older_than_window() {
    let app = spawn_test_app().await;
    let t = today();
    seed_counters(
        app.store(),
        &[
            (t, "/a", 1),
            (t - Duration::days(365), "/a", 2),
            (t - Duration::days(366), "/a", 3),
        ],
    );

    let summary = retention_prune::prune(app.store(), 365, app.clock.as_ref()).unwrap();
    assert_eq!(summary.cutoff, t - Duration::days(365));
    assert_eq!(summary.rows_removed, 1);
    assert_eq!(app.store().count_counter_rows(), 2);

    // 时间前进后，上一轮保留的行也会过期
    app.clock.advance(Duration::days(2));
    assert_eq!(app.clock.today(), t + Duration::days(2));
    let summary = retention_prune::prune(app.store(), 365, app.clock.as_ref()).unwrap();
    assert_eq!(summary.rows_removed, 1);
    assert_eq!(app.store().get_daily_count(t, "/a").unwrap(), 1);
}
