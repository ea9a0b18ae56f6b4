//! Дерево топиков с сохранёнными значениями и метаданными.
//!
//! Узлы живут в арене и адресуются [`NodeId`]. Дочерние узлы хранятся в
//! порядке создания и никогда не переупорядочиваются; отдельные узлы не
//! удаляются, дерево разбирается целиком через [`TopicTree::finalize`].

use gaugebus_error::TopicError;
use tracing::debug;

use super::Subscription;
use crate::{
    message::Envelope,
    topic::{Topic, ACTION_PREFIX},
};

/// Индекс узла в арене.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Default)]
pub(crate) struct TopicNode {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) value: Option<Envelope>,
    pub(crate) meta: Option<Envelope>,
    pub(crate) subscriptions: Vec<Subscription>,
}

/// Дерево топиков. Принадлежит потоку диспетчера.
pub struct TopicTree {
    pub(crate) nodes: Vec<TopicNode>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TopicTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TopicNode::default()],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Находит узел пути, создавая недостающие уровни.
    ///
    /// Суффикс, если он есть, отбрасывается. Слишком длинный уровень или
    /// путь отклоняется без создания узлов.
    pub fn find_or_create(
        &mut self,
        path: &str,
    ) -> Result<NodeId, TopicError> {
        let topic = Topic::parse(path)?;
        let mut node = NodeId::ROOT;
        for segment in topic.segments() {
            node = match self.child(node, segment) {
                Some(child) => child,
                None => self.add_child(node, segment),
            };
        }
        Ok(node)
    }

    /// Находит существующий узел. `None`, если пути нет или он некорректен.
    pub fn find(
        &self,
        path: &str,
    ) -> Option<NodeId> {
        let topic = Topic::parse(path).ok()?;
        let mut node = NodeId::ROOT;
        for segment in topic.segments() {
            node = self.child(node, segment)?;
        }
        Some(node)
    }

    fn child(
        &self,
        node: NodeId,
        name: &str,
    ) -> Option<NodeId> {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].name == name)
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TopicNode {
            name: name.to_string(),
            parent: Some(parent),
            ..TopicNode::default()
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn name(
        &self,
        node: NodeId,
    ) -> &str {
        &self.nodes[node.0].name
    }

    pub fn parent(
        &self,
        node: NodeId,
    ) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(
        &self,
        node: NodeId,
    ) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Полный путь узла.
    pub fn path(
        &self,
        node: NodeId,
    ) -> String {
        let mut names = Vec::new();
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id != NodeId::ROOT {
                names.push(self.nodes[id.0].name.as_str());
            }
            cur = self.nodes[id.0].parent;
        }
        names.reverse();
        names.join("/")
    }

    pub fn value(
        &self,
        node: NodeId,
    ) -> Option<&Envelope> {
        self.nodes[node.0].value.as_ref()
    }

    pub fn metadata(
        &self,
        node: NodeId,
    ) -> Option<&Envelope> {
        self.nodes[node.0].meta.as_ref()
    }

    /// Заменяет сохранённое значение узла, освобождая прежнее.
    ///
    /// Значение сохраняется, только если у него установлен флаг
    /// `RETAIN` и имя узла не начинается с `!`. Иначе узел остаётся без
    /// значения, а конверт возвращается вызывающему.
    pub fn set_retained(
        &mut self,
        node: NodeId,
        envelope: Envelope,
    ) -> Option<Envelope> {
        let slot = &mut self.nodes[node.0];
        slot.value = None;
        if envelope.is_retained() && !slot.name.starts_with(ACTION_PREFIX) {
            slot.value = Some(envelope);
            None
        } else {
            Some(envelope)
        }
    }

    /// Заменяет метаданные узла. Метаданные сохраняются всегда.
    pub fn set_metadata(
        &mut self,
        node: NodeId,
        envelope: Envelope,
    ) {
        self.nodes[node.0].meta = Some(envelope);
    }

    pub fn subscriptions(
        &self,
        node: NodeId,
    ) -> &[Subscription] {
        &self.nodes[node.0].subscriptions
    }

    /// Добавляет подписку в конец списка узла.
    pub fn add_subscription(
        &mut self,
        node: NodeId,
        subscription: Subscription,
    ) {
        self.nodes[node.0].subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Разбирает дерево: дочерние узлы раньше родителей. Сохранённые
    /// конверты и подписки освобождаются, остаётся пустой корень.
    pub fn finalize(&mut self) {
        let count = self.nodes.len();
        // дочерний узел всегда создаётся после родителя
        while let Some(node) = self.nodes.pop() {
            drop(node);
        }
        self.nodes.push(TopicNode::default());
        debug!(nodes = count, "topic tree finalized");
    }
}

impl Default for TopicTree {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EnvelopePool, ValueFlags, ValueRef};

    /// Тест проверяет создание и поиск узлов.
    #[test]
    fn test_find_or_create_and_find() {
        let mut tree = TopicTree::new();
        let ab = tree.find_or_create("a/b").unwrap();
        assert_eq!(tree.find("a/b"), Some(ab));
        assert_eq!(tree.find_or_create("a/b").unwrap(), ab);
        let a = tree.find("a").unwrap();
        assert_eq!(tree.parent(ab), Some(a));
        assert_eq!(tree.parent(a), Some(tree.root()));
        assert_eq!(tree.find("a/c"), None);
        assert_eq!(tree.find(""), Some(tree.root()));
        assert_eq!(tree.path(ab), "a/b");
        assert_eq!(tree.find("a/b#"), Some(ab));
    }

    /// Тест проверяет, что слишком длинный уровень отклоняется без создания
    /// узлов.
    #[test]
    fn test_segment_too_long_creates_nothing() {
        let mut tree = TopicTree::new();
        assert!(tree.find_or_create("a/abcdefgh").is_err());
        assert_eq!(tree.len(), 1);
    }

    /// Тест проверяет, что дочерние узлы хранятся в порядке создания.
    #[test]
    fn test_children_in_creation_order() {
        let mut tree = TopicTree::new();
        for name in ["z", "a", "m"] {
            tree.find_or_create(&format!("p/{name}")).unwrap();
        }
        let p = tree.find("p").unwrap();
        let names: Vec<_> = tree.children(p).iter().map(|c| tree.name(*c)).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    /// Тест проверяет правила сохранения значения.
    #[test]
    fn test_set_retained_rules() {
        let pool = EnvelopePool::new();
        let mut tree = TopicTree::new();
        let t = Topic::parse("a/b").unwrap();
        let node = tree.find_or_create(t.as_str()).unwrap();

        let kept = tree.set_retained(node, pool.envelope(t.clone(), 1u8, ValueFlags::RETAIN));
        assert!(kept.is_none());
        assert_eq!(tree.value(node).map(|e| e.value()), Some(ValueRef::U8(1)));

        let back = tree.set_retained(node, pool.envelope(t, 2u8, ValueFlags::empty()));
        assert!(back.is_some());
        assert!(tree.value(node).is_none());

        let action = Topic::parse("a/!run").unwrap();
        let node = tree.find_or_create(action.as_str()).unwrap();
        let back = tree.set_retained(node, pool.envelope(action, 1u8, ValueFlags::RETAIN));
        assert!(back.is_some());
        assert!(tree.value(node).is_none());
    }

    /// Тест проверяет, что разбор дерева возвращает буферы в пул.
    #[test]
    fn test_finalize_releases_everything() {
        let pool = EnvelopePool::new();
        let mut tree = TopicTree::new();
        for path in ["a/b", "a/c", "x"] {
            let t = Topic::parse(path).unwrap();
            let node = tree.find_or_create(path).unwrap();
            tree.set_retained(node, pool.envelope(t.clone(), 1u8, ValueFlags::RETAIN));
            tree.set_metadata(node, pool.envelope(t, "{}", ValueFlags::empty()));
        }
        tree.finalize();
        assert!(tree.is_empty());
        let stats = pool.stats().control;
        assert_eq!(stats.released, 6);
        assert_eq!(tree.find("a"), None);
    }
}
