//! Property-based tests для топиков, приведения значений и повтора
//! сохранённых значений.

use std::sync::Arc;

use gaugebus::{
    pubsub::{Subscription, TopicTree},
    EnvelopePool, SubscribeFlags, SubscriberRef, Topic, Value, ValueFlags, ValueType,
};
use parking_lot::Mutex;
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 256;

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_.]{0,6}"
}

fn path(max_levels: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..=max_levels)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: PROPTEST_CASES,
        .. ProptestConfig::default()
    })]

    /// Тест проверяет, что корректный путь разбирается без изменений, а
    /// уровни сохраняются.
    #[test]
    fn prop_valid_topic_round_trip(levels in path(7)) {
        let raw = levels.join("/");
        let topic = Topic::parse(&raw).unwrap();
        prop_assert_eq!(topic.as_str(), raw.as_str());
        prop_assert_eq!(topic.suffix(), None);
        let segments: Vec<&str> = topic.segments().collect();
        prop_assert_eq!(segments, levels.iter().map(String::as_str).collect::<Vec<_>>());
        prop_assert_eq!(topic.last_segment(), levels.last().unwrap().as_str());
    }

    /// Тест проверяет, что уровень длиннее семи байт отклоняется.
    #[test]
    fn prop_long_segment_rejected(
        mut levels in path(4),
        long in "[a-z]{8,12}",
        pos in 0usize..4,
    ) {
        let pos = pos.min(levels.len());
        levels.insert(pos, long);
        prop_assert!(Topic::parse(&levels.join("/")).is_err());
    }

    /// Тест проверяет, что суффикс кода возврата заменяет прежний и
    /// снимается без изменения пути.
    #[test]
    fn prop_suffix_replace(levels in path(5)) {
        let raw = levels.join("/");
        let meta = Topic::parse(&format!("{raw}$")).unwrap();
        let rc = meta.with_suffix(gaugebus::TopicSuffix::ReturnCode);
        prop_assert_eq!(rc.as_str(), format!("{raw}#"));
        prop_assert_eq!(rc.path(), raw.as_str());
        let stripped = rc.without_suffix();
        prop_assert_eq!(stripped.as_str(), raw.as_str());
    }

    /// Тест проверяет, что расширение и обратное сужение целого без потерь.
    #[test]
    fn prop_integer_widen_narrow(v in any::<u8>(), w in any::<i16>()) {
        let wide = Value::U8(v).view().as_type(ValueType::U64).unwrap();
        prop_assert_eq!(wide.view().as_type(ValueType::U8).unwrap(), Value::U8(v));

        let wide = Value::I16(w).view().as_type(ValueType::I64).unwrap();
        prop_assert_eq!(wide.view().as_type(ValueType::I16).unwrap(), Value::I16(w));
    }

    /// Тест проверяет, что отрицательное число не приводится к беззнаковому
    /// типу, а неотрицательное приводится.
    #[test]
    fn prop_signed_to_unsigned(v in any::<i32>()) {
        let result = Value::I32(v).view().as_type(ValueType::U32);
        if v < 0 {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result.unwrap(), Value::U32(v as u32));
        }
    }

    /// Тест проверяет эквивалентность `u64` и `i64` для неотрицательных
    /// значений.
    #[test]
    fn prop_u64_i64_equiv(v in any::<i64>()) {
        let signed = Value::I64(v);
        let unsigned = Value::U64(v as u64);
        prop_assert_eq!(signed.view().equiv(&unsigned.view()), v >= 0);
    }

    /// Тест проверяет, что повтор сохранённых значений посещает каждый
    /// топик один раз и родителя раньше потомков.
    #[test]
    fn prop_replay_visits_parent_first(paths in prop::collection::vec(path(4), 1..16)) {
        let pool = EnvelopePool::new();
        let mut tree = TopicTree::new();
        let mut topics = Vec::new();
        for levels in &paths {
            for depth in 1..=levels.len() {
                let raw = levels[..depth].join("/");
                if topics.contains(&raw) {
                    continue;
                }
                let node = tree.find_or_create(&raw).unwrap();
                let env = pool.envelope(Topic::parse(&raw).unwrap(), 1u8, ValueFlags::RETAIN);
                tree.set_retained(node, env);
                topics.push(raw);
            }
        }

        let seen: Arc<Mutex<Vec<String>>> = Default::default();
        let sink = Arc::clone(&seen);
        let sub = SubscriberRef::external(move |topic, _| sink.lock().push(topic.to_string()));
        tree.replay(
            tree.root(),
            &Subscription::new(sub, SubscribeFlags::RETAIN | SubscribeFlags::PUB),
        );

        let seen = seen.lock();
        prop_assert_eq!(seen.len(), topics.len());
        for (idx, topic) in seen.iter().enumerate() {
            if let Some((parent, _)) = topic.rsplit_once('/') {
                let parent_pos = seen.iter().position(|t| t == parent).unwrap();
                prop_assert!(parent_pos < idx);
            }
        }
    }
}
