#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::{Value, json};

    use sealdex::cache::{Range, RangeCache};
    use sealdex::crypto::AesIndexCipher;
    use sealdex::entity::id::{
        CUSTOM_MAX_ID, CUSTOM_MIN_ID, GENERATED_MAX_ID, GENERATED_MIN_ID, custom_id_from_bytes,
        timestamp_to_generated_id,
    };
    use sealdex::entity::{EntityKind, IdTuple, MemoryRestClient};
    use sealdex::events::{EntityUpdate, EventBatch, OperationType};
    use sealdex::store::{Db, MemoryStore};

    fn gid(n: u64) -> String {
        timestamp_to_generated_id(1_000 * n)
    }

    fn instance(list: &str, element: &str) -> Value {
        json!({ "_id": { "listId": list, "elementId": element }, "n": element })
    }

    fn element_ids(values: &[Value]) -> Vec<String> {
        values
            .iter()
            .map(|value| IdTuple::from_instance(value).unwrap().element_id)
            .collect()
    }

    fn cache(rest: Arc<MemoryRestClient>, limit: usize) -> RangeCache {
        let db = Arc::new(Db::with_cipher(
            Arc::new(MemoryStore::new()),
            Arc::new(AesIndexCipher::generate()),
        ));
        RangeCache::new(db, rest, limit)
    }

    /// Every remote element inside the cached range must be cached.
    async fn assert_range_complete(cache: &RangeCache, remote: &[String]) {
        let Some(range) = cache
            .storage()
            .get_range_for_list(EntityKind::Mail, "inbox")
            .await
            .unwrap()
        else {
            return;
        };
        let expected: Vec<String> = remote
            .iter()
            .filter(|id| range.contains(EntityKind::Mail, id))
            .cloned()
            .collect();
        let cached = cache
            .storage()
            .get_ids_in_range(EntityKind::Mail, "inbox")
            .await
            .unwrap();
        assert_eq!(cached, expected, "range {range:?}");
    }

    #[tokio::test]
    async fn test_random_loads_keep_the_range_complete() {
        let rest = Arc::new(MemoryRestClient::new());
        let remote: Vec<String> = (1..=60).map(gid).collect();
        for id in &remote {
            rest.put_raw(EntityKind::Mail, &instance("inbox", id)).unwrap();
        }
        let cache = cache(rest.clone(), 7);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..40 {
            let start = match rng.random_range(0..10) {
                0 => GENERATED_MIN_ID.to_string(),
                1 => GENERATED_MAX_ID.to_string(),
                _ => gid(rng.random_range(0..=61)),
            };
            let count = rng.random_range(1..=12);
            let reverse = rng.random_bool(0.5);

            let page = cache
                .load_raw_range(EntityKind::Mail, "inbox", &start, count, reverse)
                .await
                .unwrap();

            let mut expected: Vec<String> = if reverse {
                remote.iter().rev().filter(|id| **id < start).cloned().collect()
            } else {
                remote.iter().filter(|id| **id > start).cloned().collect()
            };
            expected.truncate(count);
            assert_eq!(element_ids(&page), expected, "start {start} reverse {reverse}");
            assert_range_complete(&cache, &remote).await;
        }
    }

    #[tokio::test]
    async fn test_reads_inside_the_range_stay_local() {
        let rest = Arc::new(MemoryRestClient::new());
        for n in 1..=20 {
            rest.put_raw(EntityKind::Mail, &instance("inbox", &gid(n))).unwrap();
        }
        let cache = cache(rest.clone(), 100);

        let newest = cache
            .load_raw_range(EntityKind::Mail, "inbox", GENERATED_MAX_ID, 10, true)
            .await
            .unwrap();
        assert_eq!(element_ids(&newest)[0], gid(20));
        let calls = rest.load_range_calls();

        let inside = cache
            .load_raw_range(EntityKind::Mail, "inbox", &gid(18), 5, true)
            .await
            .unwrap();
        assert_eq!(element_ids(&inside), (13..=17).rev().map(gid).collect::<Vec<_>>());
        assert_eq!(rest.load_range_calls(), calls);

        let ids: Vec<String> = [5, 12, 15].into_iter().map(gid).collect();
        assert_eq!(
            cache
                .get_element_ids_in_cache_range(EntityKind::Mail, "inbox", &ids)
                .await
                .unwrap(),
            vec![gid(12), gid(15)]
        );
    }

    #[tokio::test]
    async fn test_calendar_events_use_the_full_range() {
        let rest = Arc::new(MemoryRestClient::new());
        // Byte order differs from string order for these ids.
        let ids: Vec<String> = [0x00u8, 0x3F, 0x80, 0xF8, 0xFB]
            .iter()
            .map(|b| custom_id_from_bytes(&[*b]))
            .collect();
        for id in &ids {
            rest.put_raw(EntityKind::CalendarEvent, &instance("calendar", id))
                .unwrap();
        }
        let cache = cache(rest.clone(), 2);

        let all = cache
            .load_raw_range(EntityKind::CalendarEvent, "calendar", CUSTOM_MIN_ID, 10, false)
            .await
            .unwrap();
        assert_eq!(element_ids(&all), ids);
        assert_eq!(
            cache
                .storage()
                .get_range_for_list(EntityKind::CalendarEvent, "calendar")
                .await
                .unwrap(),
            Some(Range::new(CUSTOM_MIN_ID, CUSTOM_MAX_ID))
        );
        let calls = rest.load_range_calls();

        let newest_two = cache
            .load_raw_range(EntityKind::CalendarEvent, "calendar", CUSTOM_MAX_ID, 2, true)
            .await
            .unwrap();
        assert_eq!(element_ids(&newest_two), vec![ids[4].clone(), ids[3].clone()]);
        assert_eq!(rest.load_range_calls(), calls);

        // A created event inside the full range is loaded into the cache.
        let created = custom_id_from_bytes(&[0x90]);
        rest.put_raw(EntityKind::CalendarEvent, &instance("calendar", &created))
            .unwrap();
        cache
            .entity_events_received(&EventBatch::new(
                "calendarGroup",
                "b1",
                vec![EntityUpdate::new(
                    OperationType::Create,
                    EntityKind::CalendarEvent,
                    "calendar",
                    &created,
                )],
            ))
            .await
            .unwrap();
        let after = cache
            .load_raw_range(EntityKind::CalendarEvent, "calendar", &ids[2], 1, false)
            .await
            .unwrap();
        assert_eq!(element_ids(&after), vec![created]);
    }

    #[tokio::test]
    async fn test_events_inside_and_outside_the_range() {
        let rest = Arc::new(MemoryRestClient::new());
        rest.create_list(EntityKind::Contact, "contacts");
        for n in 1..=3 {
            rest.put_raw(EntityKind::Contact, &instance("contacts", &gid(n)))
                .unwrap();
        }
        let cache = cache(rest.clone(), 100);
        cache
            .load_raw_range(EntityKind::Contact, "contacts", GENERATED_MIN_ID, 2, false)
            .await
            .unwrap();
        assert_eq!(
            cache
                .storage()
                .get_range_for_list(EntityKind::Contact, "contacts")
                .await
                .unwrap(),
            Some(Range::new(GENERATED_MIN_ID, gid(2)))
        );

        let inside = timestamp_to_generated_id(500);
        let above = gid(9);
        for id in [&inside, &above] {
            rest.put_raw(EntityKind::Contact, &instance("contacts", id))
                .unwrap();
        }
        let create = |id: &str| {
            EntityUpdate::new(OperationType::Create, EntityKind::Contact, "contacts", id)
        };
        let loads = rest.load_calls();
        cache
            .entity_events_received(&EventBatch::new(
                "group",
                "b1",
                vec![create(&inside), create(&above)],
            ))
            .await
            .unwrap();
        assert_eq!(rest.load_calls(), loads + 1);

        let cached = cache
            .storage()
            .get_ids_in_range(EntityKind::Contact, "contacts")
            .await
            .unwrap();
        assert_eq!(cached, vec![inside, gid(1), gid(2)]);
        assert!(
            cache
                .storage()
                .get(EntityKind::Contact, &IdTuple::new("contacts", above))
                .await
                .unwrap()
                .is_none()
        );
    }
}
