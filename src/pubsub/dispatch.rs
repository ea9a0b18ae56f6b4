//! Доставка конвертов подписчикам: всплытие к предкам, повтор сохранённых
//! значений и отписка.

use gaugebus_error::StatusCode;
use tracing::{trace, warn};

use super::{
    tree::{NodeId, TopicTree},
    DeliveryClass, SubscribeFlags, SubscriberId, Subscription,
};
use crate::message::Envelope;

impl TopicTree {
    /// Доставляет конверт подписчикам узла и всех его предков.
    ///
    /// Подписчик получает конверт, если его флаги включают `class` и он не
    /// является отправителем конверта. Ошибка одного подписчика не мешает
    /// доставке остальным; возвращается первая из ошибок.
    pub fn deliver(
        &self,
        node: NodeId,
        envelope: &Envelope,
        class: DeliveryClass,
    ) -> Result<(), StatusCode> {
        let origin = envelope.origin();
        let mut first_error = None;
        let mut cur = Some(node);
        while let Some(id) = cur {
            for sub in self.subscriptions(id) {
                if !sub.accepts(class) || Some(sub.subscriber.id()) == origin {
                    continue;
                }
                if let Err(code) = sub.subscriber.deliver(envelope) {
                    warn!(
                        topic = %envelope.topic(),
                        code = %code,
                        "subscriber returned an error"
                    );
                    first_error.get_or_insert(code);
                }
            }
            cur = self.parent(id);
        }
        match first_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    /// Повторяет сохранённые метаданные и значения поддерева `node` новому
    /// подписчику: обход в глубину в порядке создания узлов.
    pub fn replay(
        &self,
        node: NodeId,
        subscription: &Subscription,
    ) {
        if !subscription.flags.contains(SubscribeFlags::RETAIN) {
            return;
        }
        let want_meta = subscription.flags.contains(SubscribeFlags::METADATA_RSP);
        let want_value = subscription.flags.contains(SubscribeFlags::PUB);
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if want_meta {
                if let Some(meta) = self.metadata(id) {
                    self.replay_one(subscription, meta);
                }
            }
            if want_value {
                if let Some(value) = self.value(id) {
                    self.replay_one(subscription, value);
                }
            }
            stack.extend(self.children(id).iter().rev());
        }
    }

    fn replay_one(
        &self,
        subscription: &Subscription,
        envelope: &Envelope,
    ) {
        trace!(topic = %envelope.topic(), "replay");
        if let Err(code) = subscription.subscriber.deliver(envelope) {
            warn!(topic = %envelope.topic(), code = %code, "subscriber rejected replay");
        }
    }

    /// Удаляет подписки с идентичностью `id` на одном узле. Возвращает
    /// число удалённых.
    pub fn remove(
        &mut self,
        node: NodeId,
        id: SubscriberId,
    ) -> usize {
        let subs = &mut self.nodes[node.0].subscriptions;
        let before = subs.len();
        subs.retain(|s| s.subscriber.id() != id);
        before - subs.len()
    }

    /// Удаляет подписки с идентичностью `id` во всём поддереве `node`.
    pub fn remove_subtree(
        &mut self,
        node: NodeId,
        id: SubscriberId,
    ) -> usize {
        let mut removed = 0;
        let mut stack = vec![node];
        while let Some(cur) = stack.pop() {
            removed += self.remove(cur, id);
            stack.extend(self.children(cur).iter().copied());
        }
        removed
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
