/// Redis key layout shared by the store and its tests.
///
/// Entity documents live at `prefix:namespace:collection:id`; the integer
/// identity counter of a collection lives at `prefix:namespace:collection:__seq`.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
    pub namespace: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str, namespace: &'a str) -> Self {
        Self { prefix, namespace }
    }

    pub fn entity(&self, collection: &str, entity_id: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, self.namespace, collection, entity_id)
    }

    pub fn sequence(&self, collection: &str) -> String {
        format!("{}:{}:{}:__seq", self.prefix, self.namespace, collection)
    }

    /// SCAN pattern matching every key of a collection, the counter included.
    pub fn collection_pattern(&self, collection: &str) -> String {
        format!("{}:{}:{}:*", self.prefix, self.namespace, collection)
    }
}
