use http::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderValue, Method, Response};
use http_cache_executor::{
    BoxError, CachedResponse, Error, Etag, Expiration, ExpiresIn, HttpExecutor, Payload,
    ResourceRequest, SerdeHydrator, TargetType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::SystemTime;

use crate::{
    banner_json, banner_key, banner_request, json_builder, options, response, Banner, Harness,
    RecordingStorage, StubTransport,
};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn banner_response(cache_control: &str, etag: Option<&str>, id: u32, title: &str) -> http_cache_executor::HttpResponse {
    let mut builder = json_builder(200).header(CACHE_CONTROL, cache_control);
    if let Some(etag) = etag {
        builder = builder.header(ETAG, etag);
    }
    response(builder, &banner_json(id, title))
}

fn not_modified(cache_control: &str) -> http_cache_executor::HttpResponse {
    response(
        Response::builder().status(304).header(CACHE_CONTROL, cache_control),
        "",
    )
}

fn seeded(id: u32, title: &str, max_age: i64, etag: Option<&str>) -> (CachedResponse, Arc<Banner>) {
    let banner = Arc::new(Banner {
        id,
        title: title.into(),
    });
    let cached = CachedResponse::new(
        banner_key(id),
        Arc::clone(&banner) as Payload,
        Expiration::create(max_age).unwrap(),
        etag.map(Etag::new),
    );
    (cached, banner)
}

#[test]
fn miss_fetches_hydrates_and_stores() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("max-age=60", Some("\"v1\""), 7, "Spring sale"));

    let banner = h.fetch(7).unwrap();
    assert_eq!(
        *banner,
        Banner {
            id: 7,
            title: "Spring sale".into()
        }
    );
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.hydrations(), 1);

    let sent = h.transport.last_request();
    assert_eq!(sent.method(), Method::GET);
    assert_eq!(sent.uri(), "https://cms.example.com/api/banners/7");
    assert!(sent.headers().get(IF_NONE_MATCH).is_none());

    let stored = h.stored(7).expect("response was not stored");
    assert!(stored.is_fresh());
    assert_eq!(stored.etag().map(Etag::as_str), Some("\"v1\""));
    assert!(Arc::ptr_eq(&stored.downcast_payload::<Banner>().unwrap(), &banner));
}

#[test]
fn fresh_hit_skips_the_network() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Spring sale"));

    let first = h.fetch(7).unwrap();
    let second = h.fetch(7).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.hydrations(), 1);
}

#[test]
fn key_covers_method_and_resolved_url() {
    let h = Harness::new();
    let (cached, seeded) = seeded(7, "Seeded", 60, None);
    h.seed(cached);

    let banner = h.fetch(7).unwrap();
    assert!(Arc::ptr_eq(&banner, &seeded));
    assert_eq!(h.transport.calls(), 0);
    assert_eq!(h.hydrations(), 0);
}

#[test]
fn stale_entry_is_revalidated_and_reused_on_304() {
    let h = Harness::new();
    let (cached, seeded) = seeded(7, "Spring sale", 0, Some("\"v1\""));
    h.seed(cached);
    h.transport.reply(not_modified("max-age=60"));

    let banner = h.fetch(7).unwrap();
    assert!(Arc::ptr_eq(&banner, &seeded));
    assert_eq!(h.hydrations(), 0);

    let sent = h.transport.last_request();
    assert_eq!(sent.headers()[IF_NONE_MATCH], "\"v1\"");

    let stored = h.stored(7).unwrap();
    assert!(stored.is_fresh());
    assert_eq!(stored.etag().map(Etag::as_str), Some("\"v1\""));
    assert!(Arc::ptr_eq(&stored.downcast_payload::<Banner>().unwrap(), &seeded));

    // fresh again, so no further request
    h.fetch(7).unwrap();
    assert_eq!(h.transport.calls(), 1);
}

#[test]
fn stale_entry_is_replaced_when_modified() {
    let h = Harness::new();
    let (cached, _) = seeded(7, "Spring sale", 0, Some("\"v1\""));
    h.seed(cached);
    h.transport
        .reply(banner_response("max-age=60", Some("\"v2\""), 7, "Summer sale"));

    let banner = h.fetch(7).unwrap();
    assert_eq!(banner.title, "Summer sale");
    assert_eq!(h.hydrations(), 1);
    assert_eq!(h.transport.last_request().headers()[IF_NONE_MATCH], "\"v1\"");

    let stored = h.stored(7).unwrap();
    assert_eq!(stored.etag().map(Etag::as_str), Some("\"v2\""));
    assert_eq!(stored.downcast_payload::<Banner>().unwrap().title, "Summer sale");
}

#[test]
fn stale_entry_without_etag_is_refetched() {
    let h = Harness::new();
    let (cached, _) = seeded(7, "Spring sale", 0, None);
    h.seed(cached);
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Summer sale"));

    assert_eq!(h.fetch(7).unwrap().title, "Summer sale");
    assert!(h.transport.last_request().headers().get(IF_NONE_MATCH).is_none());
}

#[test]
fn not_modified_without_cached_entry_fails_hydration() {
    let h = Harness::new();
    h.transport.reply(not_modified("max-age=60"));
    assert!(matches!(h.fetch(7), Err(Error::Hydration(_))));
    assert!(h.stored(7).is_none());
}

#[test]
fn no_store_is_never_saved() {
    let h = Harness::new();
    for _ in 0..2 {
        h.transport
            .reply(banner_response("no-store, max-age=600", Some("\"v1\""), 7, "Spring sale"));
    }

    h.fetch(7).unwrap();
    h.fetch(7).unwrap();
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.storage.saves(), 0);
    assert!(h.stored(7).is_none());
    assert!(h.transport.last_request().headers().get(IF_NONE_MATCH).is_none());
}

#[test]
fn no_cache_is_stored_stale_and_revalidated() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("no-cache, max-age=600", Some("\"v1\""), 7, "Spring sale"));
    let first = h.fetch(7).unwrap();

    let stored = h.stored(7).unwrap();
    assert!(!stored.is_fresh());

    h.transport.reply(not_modified("no-cache"));
    let second = h.fetch(7).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.hydrations(), 1);
    assert_eq!(h.transport.last_request().headers()[IF_NONE_MATCH], "\"v1\"");
}

#[test]
fn missing_cache_control_stores_a_stale_entry() {
    let h = Harness::new();
    h.transport.reply(response(
        json_builder(200).header(ETAG, "\"v1\""),
        &banner_json(7, "Spring sale"),
    ));
    h.fetch(7).unwrap();

    let stored = h.stored(7).unwrap();
    assert!(!stored.is_fresh());
    assert!(stored.etag().is_some());
}

#[test]
fn shared_max_age_wins() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("max-age=60, s-maxage=600", None, 7, "Spring sale"));

    let before = unix_now();
    h.fetch(7).unwrap();
    let after = unix_now();

    let expires = h.stored(7).unwrap().max_age().timestamp();
    assert!(expires >= before + 600 && expires <= after + 600, "{expires}");
}

#[test]
fn override_replaces_response_cache_control() {
    let mut options = options();
    options.cache_control_override = Some("max-age=300".parse().unwrap());
    let h = Harness::with_options(options);
    h.transport
        .reply(banner_response("no-store", None, 7, "Spring sale"));

    h.fetch(7).unwrap();
    h.fetch(7).unwrap();
    assert_eq!(h.transport.calls(), 1);
    assert!(h.stored(7).unwrap().is_fresh());
}

#[test]
fn requests_without_components_bypass_the_cache() {
    let h = Harness::new();
    for _ in 0..2 {
        h.transport
            .reply(banner_response("max-age=600", Some("\"v1\""), 7, "Spring sale"));
    }

    for _ in 0..2 {
        h.executor
            .fetch::<Banner>(ResourceRequest::get("banners/7"))
            .unwrap();
    }
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.storage.gets(), 0);
    assert_eq!(h.storage.saves(), 0);
}

#[test]
fn storage_failures_do_not_fail_requests() {
    let h = Harness::with_storage(RecordingStorage::failing());
    for _ in 0..2 {
        h.transport
            .reply(banner_response("max-age=600", None, 7, "Spring sale"));
    }

    assert_eq!(h.fetch(7).unwrap().title, "Spring sale");
    assert_eq!(h.fetch(7).unwrap().title, "Spring sale");
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.storage.gets(), 2);
    assert_eq!(h.storage.saves(), 2);
}

#[test]
fn storage_ttl_bounds_revalidation() {
    let mut options = options();
    options.storage_ttl = ExpiresIn::Seconds(-10);
    let h = Harness::with_options(options);
    for _ in 0..2 {
        h.transport
            .reply(banner_response("no-cache", Some("\"v1\""), 7, "Spring sale"));
    }

    h.fetch(7).unwrap();
    h.fetch(7).unwrap();
    // the entry was already gone from storage, so there was nothing to revalidate
    assert!(h.transport.last_request().headers().get(IF_NONE_MATCH).is_none());
    assert_eq!(h.hydrations(), 2);
}

#[test]
fn invalid_storage_ttl_fails_build() {
    let mut options = options();
    options.storage_ttl = "whenever".into();
    let err = HttpExecutor::builder(options, StubTransport::default(), SerdeHydrator::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidExpiration(raw) if raw == "whenever"));
}

#[test]
fn paths_resolve_against_base_url() {
    let h = Harness::new();
    for _ in 0..2 {
        h.transport
            .reply(banner_response("max-age=60", None, 7, "Spring sale"));
    }

    h.executor
        .fetch::<Banner>(ResourceRequest::get("banners?page=2"))
        .unwrap();
    assert_eq!(h.transport.last_request().uri(), "https://cms.example.com/api/banners?page=2");

    h.executor
        .fetch::<Banner>(ResourceRequest::get("/v2/banners"))
        .unwrap();
    assert_eq!(h.transport.last_request().uri(), "https://cms.example.com/v2/banners");
}

#[test]
fn unresolvable_path_is_rejected() {
    let h = Harness::new();
    let err = h
        .executor
        .fetch::<Banner>(ResourceRequest::get("http://[::1"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl { ref path, .. } if path == "http://[::1"));
    assert_eq!(h.transport.calls(), 0);
}

#[test]
fn method_headers_and_body_are_forwarded() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Spring sale"));

    let request = ResourceRequest::post("banners/search")
        .json(&json!({"q": "sale"}))
        .unwrap()
        .header(ACCEPT, HeaderValue::from_static("application/json"));
    h.executor.fetch::<Banner>(request).unwrap();

    let sent = h.transport.last_request();
    assert_eq!(sent.method(), Method::POST);
    assert_eq!(sent.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(sent.headers()[ACCEPT], "application/json");
    assert_eq!(sent.body().as_slice(), br#"{"q":"sale"}"#);
}

#[test]
fn default_headers_are_injected() {
    let mut options = options();
    options
        .default_headers
        .insert("x-origin", HeaderValue::from_static("banners"));
    let h = Harness::with_options(options);
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Spring sale"));

    h.fetch(7).unwrap();
    assert_eq!(h.transport.last_request().headers()["x-origin"], "banners");
    assert_eq!(
        h.executor.middlewares().names(),
        ["unexpected_error", "response_exception", "header:x-origin"]
    );
}

#[test]
fn multi_valued_default_headers_keep_every_value() {
    let mut options = options();
    for lang in ["de", "en;q=0.8"] {
        options
            .default_headers
            .append(ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
    }
    let h = Harness::with_options(options);
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Spring sale"));

    let request = banner_request(7).header(ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));
    h.executor.fetch::<Banner>(request).unwrap();

    let sent = h.transport.last_request();
    let langs: Vec<_> = sent.headers().get_all(ACCEPT_LANGUAGE).iter().collect();
    assert_eq!(langs, ["de", "en;q=0.8"]);
    assert_eq!(
        h.executor.middlewares().names(),
        ["unexpected_error", "response_exception", "header:accept-language"]
    );
}

#[test]
fn undecodable_body_fails_hydration() {
    let h = Harness::new();
    h.transport.reply(response(
        json_builder(200).header(CACHE_CONTROL, "max-age=60"),
        "<html>maintenance</html>",
    ));
    assert!(matches!(h.fetch(7), Err(Error::Hydration(_))));
    assert_eq!(h.storage.saves(), 0);
}

#[test]
fn unregistered_target_fails_hydration() {
    let h = Harness::new();
    h.transport
        .reply(banner_response("max-age=60", None, 7, "Spring sale"));
    let err = h.executor.fetch::<String>(banner_request(7)).unwrap_err();
    assert!(matches!(err, Error::Hydration(_)), "{err:?}");
}

#[test]
fn fetch_rejects_payload_of_another_type() {
    let transport = StubTransport::default();
    transport.reply(banner_response("max-age=60", None, 7, "Spring sale"));
    let hydrator = |_: TargetType, _: Value| -> Result<Payload, BoxError> { Ok(Arc::new(42_u32)) };
    let executor = HttpExecutor::builder(options(), transport, hydrator)
        .build()
        .unwrap();

    let err = executor.fetch::<Banner>(banner_request(7)).unwrap_err();
    assert!(matches!(err, Error::Hydration(_)), "{err:?}");
}
