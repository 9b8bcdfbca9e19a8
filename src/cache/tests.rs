use super::*;

fn text(s: &str) -> CacheValue {
    CacheValue::Text(s.to_string())
}

fn get_text(cache: &Cache, key: &str) -> Option<String> {
    match cache.get(key) {
        Some(CacheValue::Text(s)) => Some(s),
        Some(CacheValue::Definition(_)) => panic!("expected text value"),
        None => None,
    }
}

#[test]
fn test_put_get_roundtrip() {
    let cache = Cache::new(Duration::from_secs(60), 1024 * 1024);
    cache.put("briefing:qa:abc", text("rendered"));

    assert_eq!(get_text(&cache, "briefing:qa:abc").as_deref(), Some("rendered"));
    assert!(cache.get("briefing:qa:missing").is_none());
}

#[test]
fn test_ttl_expiry_on_read() {
    let cache = Cache::new(Duration::from_millis(20), 1024 * 1024);
    cache.put("k", text("v"));
    assert!(cache.get("k").is_some());

    std::thread::sleep(Duration::from_millis(40));
    assert!(cache.get("k").is_none());
    // The expired entry was dropped on read.
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_explicit_ttl_overrides_default() {
    let cache = Cache::new(Duration::from_secs(60), 1024 * 1024);
    cache.put_with_ttl("short", text("v"), Duration::from_millis(20));
    cache.put("long", text("v"));

    std::thread::sleep(Duration::from_millis(40));
    assert!(cache.get("short").is_none());
    assert!(cache.get("long").is_some());
}

#[test]
fn test_invalidate_prefix() {
    let cache = Cache::new(Duration::from_secs(60), 1024 * 1024);
    cache.put("agent:qa-agent:project:h1", text("a"));
    cache.put("agent:qa-agent:user:h2", text("b"));
    cache.put("agent:qa:project:h3", text("c"));

    let removed = cache.invalidate("agent:qa-agent:");
    assert_eq!(removed, 2);

    assert!(cache.get("agent:qa-agent:project:h1").is_none());
    assert!(cache.get("agent:qa-agent:user:h2").is_none());
    // A different agent with a shared name prefix survives.
    assert!(cache.get("agent:qa:project:h3").is_some());
}

#[test]
fn test_invalidated_value_never_returned() {
    let cache = Cache::new(Duration::from_secs(3600), 1024 * 1024);
    cache.put("agent:qa:project:h1", text("stale"));
    cache.invalidate("agent:qa:");

    // Long TTL: only the invalidation can explain the miss.
    assert!(cache.get("agent:qa:project:h1").is_none());
}

#[test]
fn test_invalidate_all() {
    let cache = Cache::new(Duration::from_secs(60), 1024 * 1024);
    cache.put("a", text("1"));
    cache.put("b", text("2"));

    cache.invalidate_all();
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().bytes, 0);
}

#[test]
fn test_byte_budget_evicts_oldest_first() {
    let cache = Cache::new(Duration::from_secs(60), 100);

    cache.put("first", text(&"a".repeat(40)));
    std::thread::sleep(Duration::from_millis(5));
    cache.put("second", text(&"b".repeat(40)));
    std::thread::sleep(Duration::from_millis(5));
    // 40 + 40 + 40 > 100: the oldest entry must go.
    cache.put("third", text(&"c".repeat(40)));

    assert!(cache.get("first").is_none());
    assert!(cache.get("second").is_some());
    assert!(cache.get("third").is_some());
    assert!(cache.stats().bytes <= 100);
}

#[test]
fn test_oversized_value_refused() {
    let cache = Cache::new(Duration::from_secs(60), 10);
    cache.put("huge", text(&"x".repeat(1000)));
    assert!(cache.get("huge").is_none());
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_replacing_key_updates_accounting() {
    let cache = Cache::new(Duration::from_secs(60), 1024);
    cache.put("k", text(&"a".repeat(100)));
    let before = cache.stats().bytes;
    cache.put("k", text(&"b".repeat(10)));
    let after = cache.stats().bytes;

    assert_eq!(cache.stats().entries, 1);
    assert!(after < before);
}

#[test]
fn test_sweep_removes_expired_entries() {
    let cache = Cache::new(Duration::from_millis(20), 1024 * 1024);
    cache.put("a", text("1"));
    cache.put_with_ttl("b", text("2"), Duration::from_secs(60));

    std::thread::sleep(Duration::from_millis(40));
    let removed = cache.sweep();
    assert_eq!(removed, 1);
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn test_background_sweeper_bounds_growth() {
    let cache = Cache::new(Duration::from_millis(10), 1024 * 1024);
    let _sweeper = cache.start_sweeper(Duration::from_millis(20));

    cache.put("a", text("1"));
    cache.put("b", text("2"));

    // Without any reads, the sweeper alone must reclaim the entries.
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let cache = Cache::new(Duration::from_secs(60), 1024 * 1024);
    let mut handles = Vec::new();

    for worker in 0..4 {
        let cache = cache.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..50 {
                let key = format!("agent:worker-{}:{}", worker, i);
                cache.put(key.clone(), CacheValue::Text(format!("v{}", i)));
                assert!(cache.get(&key).is_some());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.stats().entries, 200);
}
