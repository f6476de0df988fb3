//! Ordered staging list for records about to be pushed.
//!
//! Nodes live in a slot arena and link forward by index, so `append`,
//! `prepend` and `shift` are O(1) while `pop`, `remove` and `len` walk the
//! chain from the head.

#[derive(Debug, Clone)]
struct Node<T> {
    data: T,
    next: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PendingQueue<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Counts nodes by walking the chain.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn head(&self) -> Option<&T> {
        self.head.and_then(|index| self.node(index)).map(|node| &node.data)
    }

    pub fn tail(&self) -> Option<&T> {
        self.tail.and_then(|index| self.node(index)).map(|node| &node.data)
    }

    pub fn append(&mut self, data: T) {
        let index = self.allocate(Node { data, next: None });
        match self.tail {
            Some(tail) => {
                if let Some(node) = self.node_mut(tail) {
                    node.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    pub fn prepend(&mut self, data: T) {
        let index = self.allocate(Node {
            data,
            next: self.head,
        });
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    pub fn shift(&mut self) -> Option<T> {
        let head = self.head?;
        let node = self.release(head)?;
        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        Some(node.data)
    }

    pub fn pop(&mut self) -> Option<T> {
        let tail = self.tail?;
        if self.head == Some(tail) {
            self.head = None;
            self.tail = None;
            return self.release(tail).map(|node| node.data);
        }

        let mut current = self.head?;
        loop {
            let next = self.node(current)?.next;
            if next == Some(tail) {
                break;
            }
            current = next?;
        }
        if let Some(node) = self.node_mut(current) {
            node.next = None;
        }
        self.tail = Some(current);
        self.release(tail).map(|node| node.data)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    pub fn search(&self, data: &T) -> Option<&T>
    where
        T: PartialEq,
    {
        self.iter().find(|candidate| *candidate == data)
    }

    /// Unlinks the first node equal to `data`.
    pub fn remove(&mut self, data: &T) -> Option<T>
    where
        T: PartialEq,
    {
        let mut previous: Option<usize> = None;
        let mut cursor = self.head;

        while let Some(current) = cursor {
            let node = self.node(current)?;
            let next = node.next;
            if node.data == *data {
                match previous {
                    Some(previous) => {
                        if let Some(previous_node) = self.node_mut(previous) {
                            previous_node.next = next;
                        }
                    }
                    None => self.head = next,
                }
                if self.tail == Some(current) {
                    self.tail = previous;
                }
                return self.release(current).map(|node| node.data);
            }
            previous = Some(current);
            cursor = next;
        }
        None
    }

    fn node(&self, index: usize) -> Option<&Node<T>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn allocate(&mut self, node: Node<T>) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                index
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) -> Option<Node<T>> {
        let node = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(node)
    }
}

impl<T> FromIterator<T> for PendingQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        for item in iter {
            queue.append(item);
        }
        queue
    }
}

pub struct Iter<'a, T> {
    queue: &'a PendingQueue<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.node(self.cursor?)?;
        self.cursor = node.next;
        Some(&node.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn three() -> PendingQueue<&'static str> {
        ["a", "b", "c"].into_iter().collect()
    }

    #[test]
    fn shift_drains_in_insertion_order() {
        let mut queue = three();
        assert_eq!(queue.shift(), Some("a"));
        assert_eq!(queue.shift(), Some("b"));
        assert_eq!(queue.shift(), Some("c"));
        assert_eq!(queue.shift(), None);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert!(queue.tail().is_none());
    }

    #[test]
    fn prepend_and_pop_work_from_both_ends() {
        let mut queue = PendingQueue::new();
        queue.append(2);
        queue.prepend(1);
        queue.append(3);
        assert_eq!(queue.to_vec(), vec![1, 2, 3]);

        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.tail(), Some(&2));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
        assert!(queue.head().is_none());
    }

    #[test]
    fn prepend_on_empty_sets_both_ends() {
        let mut queue = PendingQueue::new();
        queue.prepend("only");
        assert_eq!(queue.head(), Some(&"only"));
        assert_eq!(queue.tail(), Some(&"only"));
    }

    #[test]
    fn removing_head_updates_head() {
        let mut queue = three();
        assert_eq!(queue.remove(&"a"), Some("a"));
        assert_eq!(queue.head(), Some(&"b"));
        assert_eq!(queue.tail(), Some(&"c"));
        assert_eq!(queue.to_vec(), vec!["b", "c"]);
    }

    #[test]
    fn removing_tail_updates_tail() {
        let mut queue = three();
        assert_eq!(queue.remove(&"c"), Some("c"));
        assert_eq!(queue.head(), Some(&"a"));
        assert_eq!(queue.tail(), Some(&"b"));
        queue.append("d");
        assert_eq!(queue.to_vec(), vec!["a", "b", "d"]);
    }

    #[test]
    fn removing_middle_keeps_ends() {
        let mut queue = three();
        assert_eq!(queue.remove(&"b"), Some("b"));
        assert_eq!(queue.head(), Some(&"a"));
        assert_eq!(queue.tail(), Some(&"c"));
        assert_eq!(queue.to_vec(), vec!["a", "c"]);
    }

    #[test]
    fn removing_sole_node_empties_queue() {
        let mut queue: PendingQueue<_> = ["x"].into_iter().collect();
        assert_eq!(queue.remove(&"x"), Some("x"));
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
        assert!(queue.tail().is_none());
        assert_eq!(queue.remove(&"x"), None);
    }

    #[test]
    fn search_finds_by_value() {
        let queue = three();
        assert_eq!(queue.search(&"b"), Some(&"b"));
        assert_eq!(queue.search(&"z"), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(u8),
        Prepend(u8),
        Shift,
        Pop,
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Append),
            any::<u8>().prop_map(Op::Prepend),
            Just(Op::Shift),
            Just(Op::Pop),
            (0u8..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_a_deque(ops in proptest::collection::vec(op(), 0..64)) {
            let mut queue = PendingQueue::new();
            let mut model = std::collections::VecDeque::new();

            for op in ops {
                match op {
                    Op::Append(value) => { queue.append(value); model.push_back(value); }
                    Op::Prepend(value) => { queue.prepend(value); model.push_front(value); }
                    Op::Shift => prop_assert_eq!(queue.shift(), model.pop_front()),
                    Op::Pop => prop_assert_eq!(queue.pop(), model.pop_back()),
                    Op::Remove(value) => {
                        let expected = model.iter().position(|item| *item == value)
                            .and_then(|index| model.remove(index));
                        prop_assert_eq!(queue.remove(&value), expected);
                    }
                }
                prop_assert_eq!(queue.is_empty(), queue.tail().is_none());
                prop_assert_eq!(queue.head(), model.front());
                prop_assert_eq!(queue.tail(), model.back());
                prop_assert_eq!(queue.to_vec(), model.iter().copied().collect::<Vec<_>>());
            }
        }
    }
}
