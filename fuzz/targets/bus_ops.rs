#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::json;
use topicbus::{Broker, MessageBus, Sandbox, Subscription};

const WORDS: [&str; 5] = ["a", "b", "c", "*", "**"];

#[derive(Debug, Arbitrary)]
struct FuzzTopic(Vec<u8>);

impl FuzzTopic {
    fn render(&self) -> String {
        let parts: Vec<&str> = self
            .0
            .iter()
            .take(4)
            .map(|b| WORDS[*b as usize % WORDS.len()])
            .collect();
        parts.join(".")
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Subscribe { topic: FuzzTopic, limit: u8, on_sandbox: bool },
    Publish { topic: FuzzTopic },
    Unsubscribe { topic: FuzzTopic },
    Cancel { index: u8 },
    CancelInCallback { topic: FuzzTopic },
    DestroySandbox,
    DestroyBroker,
}

fuzz_target!(|ops: Vec<Op>| {
    let broker = Broker::new();
    let mut sandbox: Sandbox = match broker.sandbox() {
        Ok(sandbox) => sandbox,
        Err(_) => return,
    };
    let mut subs: Vec<Subscription> = Vec::new();

    for op in ops.iter().take(64) {
        match op {
            Op::Subscribe {
                topic,
                limit,
                on_sandbox,
            } => {
                let bus: &dyn MessageBus = if *on_sandbox { &sandbox } else { &broker };
                if let Ok(sub) = bus.subscribe(&topic.render()) {
                    if *limit > 0 {
                        let _ = sub.set_limit(u64::from(*limit % 4 + 1));
                    }
                    subs.push(sub);
                }
            }
            Op::Publish { topic } => {
                let _ = broker.publish(&topic.render(), json!(null));
            }
            Op::Unsubscribe { topic } => {
                let _ = broker.unsubscribe(&topic.render());
            }
            Op::Cancel { index } => {
                if !subs.is_empty() {
                    subs[*index as usize % subs.len()].cancel();
                }
            }
            Op::CancelInCallback { topic } => {
                if let Ok(sub) =
                    broker.subscribe_fn(&topic.render(), |_, _, _, sub| sub.cancel())
                {
                    subs.push(sub);
                }
            }
            Op::DestroySandbox => {
                sandbox.destroy();
                if let Ok(fresh) = broker.sandbox() {
                    sandbox = fresh;
                }
            }
            Op::DestroyBroker => {
                broker.destroy();
            }
        }

        // Число живых подписок в дереве совпадает с отслеживаемыми.
        let mut expected: BTreeMap<String, usize> = BTreeMap::new();
        for sub in subs.iter().filter(|s| !s.is_cancelled()) {
            *expected.entry(sub.topic().to_string()).or_insert(0) += 1;
        }
        assert_eq!(broker.count().ok(), Some(expected));
    }
});
