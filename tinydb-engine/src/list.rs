//! # List Value
//!
//! Purpose: the `list` value type — a doubly linked list of elements with
//! its own lock and a bounded cache of recycled node slots, so repeated
//! `lpush`/`lpop` churn on a hot key doesn't keep growing the backing
//! storage.
//!
//! ## Design Principles
//!
//! 1. **Index-based intrusive list, not raw pointers**: nodes live in a
//!    `Vec<Option<Node>>` slab and reference each other by index, the same
//!    pattern the sibling in-memory engine uses for its LRU list. This
//!    keeps the whole thing safe, unlike the source's pointer-chasing
//!    `HPLinkedList`.
//! 2. **Bounded recycle stack**: freed slots go on `free_slots` up to
//!    `MAX_FREED_NODES`; once that cap is hit, a freed trailing slot is
//!    truncated from the slab instead of tracked forever.
//! 3. **One `RwLock` per list**: mutators take the write side, rendering
//!    (`to_string`/`range_to_string`) takes the read side.

use std::sync::Arc;

use parking_lot::RwLock;

pub const MAX_FREED_NODES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum ListElement {
    Integer(i64),
    Float(f64),
    String(Arc<[u8]>),
}

impl ListElement {
    fn render(&self) -> String {
        match self {
            ListElement::Integer(i) => i.to_string(),
            ListElement::Float(f) => format!("{:.6}", f),
            ListElement::String(s) => format!("\"{}\"", String::from_utf8_lossy(s)),
        }
    }

    /// Bare value without list-literal quoting, used when a single popped
    /// element is written back as a reply on its own.
    pub fn render_bare(&self) -> String {
        match self {
            ListElement::Integer(i) => i.to_string(),
            ListElement::Float(f) => format!("{:.6}", f),
            ListElement::String(s) => String::from_utf8_lossy(s).into_owned(),
        }
    }
}

struct Node {
    value: ListElement,
    prev: Option<usize>,
    next: Option<usize>,
}

struct ListInner {
    nodes: Vec<Option<Node>>,
    free_slots: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
}

impl ListInner {
    fn new() -> Self {
        ListInner {
            nodes: Vec::new(),
            free_slots: Vec::new(),
            head: None,
            tail: None,
            count: 0,
        }
    }

    fn alloc_node(&mut self, value: ListElement, prev: Option<usize>, next: Option<usize>) -> usize {
        let node = Node { value, prev, next };
        if let Some(idx) = self.free_slots.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.nodes[idx] = None;
        if self.free_slots.len() < MAX_FREED_NODES {
            self.free_slots.push(idx);
        } else if idx + 1 == self.nodes.len() {
            self.nodes.pop();
        }
    }

    fn push_back(&mut self, value: ListElement) {
        let idx = self.alloc_node(value, self.tail, None);
        match self.tail {
            Some(t) => self.nodes[t].as_mut().unwrap().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.count += 1;
    }

    fn push_front(&mut self, value: ListElement) {
        let idx = self.alloc_node(value, None, self.head);
        match self.head {
            Some(h) => self.nodes[h].as_mut().unwrap().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.count += 1;
    }

    fn pop_front(&mut self) -> Option<ListElement> {
        let idx = self.head?;
        let node = self.nodes[idx].take().unwrap();
        self.head = node.next;
        match self.head {
            Some(h) => self.nodes[h].as_mut().unwrap().prev = None,
            None => self.tail = None,
        }
        self.free_node(idx);
        self.count -= 1;
        Some(node.value)
    }

    fn pop_back(&mut self) -> Option<ListElement> {
        let idx = self.tail?;
        let node = self.nodes[idx].take().unwrap();
        self.tail = node.prev;
        match self.tail {
            Some(t) => self.nodes[t].as_mut().unwrap().next = None,
            None => self.head = None,
        }
        self.free_node(idx);
        self.count -= 1;
        Some(node.value)
    }

    fn iter_values(&self) -> Vec<&ListElement> {
        let mut out = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.nodes[idx].as_ref().unwrap();
            out.push(&node.value);
            cursor = node.next;
        }
        out
    }
}

pub struct ListValue {
    inner: RwLock<ListInner>,
}

impl ListValue {
    pub fn new() -> Self {
        ListValue {
            inner: RwLock::new(ListInner::new()),
        }
    }

    pub fn rpush(&self, value: ListElement) {
        self.inner.write().push_back(value);
    }

    pub fn lpush(&self, value: ListElement) {
        self.inner.write().push_front(value);
    }

    pub fn lpop(&self) -> Option<ListElement> {
        self.inner.write().pop_front()
    }

    pub fn rpop(&self) -> Option<ListElement> {
        self.inner.write().pop_back()
    }

    pub fn len(&self) -> usize {
        self.inner.read().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders `[e1, e2, …]`, strings quoted.
    pub fn to_string_rendered(&self) -> String {
        let inner = self.inner.read();
        let rendered: Vec<String> = inner.iter_values().iter().map(|v| v.render()).collect();
        format!("[{}]", rendered.join(", "))
    }

    /// Renders the inclusive sub-range `[start, stop]`, clamped to
    /// `[0, count-1]`.
    pub fn range_to_string(&self, start: i64, stop: i64) -> String {
        let inner = self.inner.read();
        let values = inner.iter_values();
        if values.is_empty() {
            return "[]".to_string();
        }

        let last = (values.len() - 1) as i64;
        let start = start.clamp(0, last) as usize;
        let stop = stop.clamp(0, last) as usize;
        if start > stop {
            return "[]".to_string();
        }

        let rendered: Vec<String> = values[start..=stop].iter().map(|v| v.render()).collect();
        format!("[{}]", rendered.join(", "))
    }

    pub fn snapshot_elements(&self) -> Vec<ListElement> {
        self.inner
            .read()
            .iter_values()
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Default for ListValue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpush_then_lpop_is_fifo() {
        let list = ListValue::new();
        list.rpush(ListElement::Integer(1));
        list.rpush(ListElement::Integer(2));
        assert_eq!(list.lpop(), Some(ListElement::Integer(1)));
        assert_eq!(list.lpop(), Some(ListElement::Integer(2)));
        assert_eq!(list.lpop(), None);
    }

    #[test]
    fn lpush_then_rpop_is_fifo() {
        let list = ListValue::new();
        list.lpush(ListElement::Integer(1));
        list.lpush(ListElement::Integer(2));
        assert_eq!(list.rpop(), Some(ListElement::Integer(1)));
    }

    #[test]
    fn len_tracks_pushes_and_pops() {
        let list = ListValue::new();
        list.rpush(ListElement::Integer(1));
        list.rpush(ListElement::Integer(2));
        list.lpop();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn to_string_rendered_quotes_strings() {
        let list = ListValue::new();
        list.rpush(ListElement::Integer(1));
        list.rpush(ListElement::String(Arc::from(b"two".as_slice())));
        assert_eq!(list.to_string_rendered(), "[1, \"two\"]");
    }

    #[test]
    fn range_to_string_clamps_bounds() {
        let list = ListValue::new();
        for i in 0..5 {
            list.rpush(ListElement::Integer(i));
        }
        assert_eq!(list.range_to_string(-10, 2), "[0, 1, 2]");
        assert_eq!(list.range_to_string(1, 100), "[1, 2, 3, 4]");
    }

    #[test]
    fn node_slots_are_recycled_after_pop() {
        let list = ListValue::new();
        list.rpush(ListElement::Integer(1));
        list.lpop();
        list.rpush(ListElement::Integer(2));
        let inner = list.inner.read();
        assert_eq!(inner.nodes.len(), 1);
    }
}
