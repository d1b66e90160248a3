//! Longest-prefix-match set of IP networks.
//!
//! A binary trie per address family. Tries are built once and then only read;
//! updates build a fresh trie and swap it in behind an `ArcSwap`.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

#[derive(Debug)]
struct Node<T> {
    children: [Option<Box<Node<T>>>; 2],
    entry: Option<(IpNetwork, T)>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            children: [None, None],
            entry: None,
        }
    }
}

/// A set of `(network, tag)` entries answering longest-prefix queries.
#[derive(Debug)]
pub struct IpTrie<T> {
    v4: Node<T>,
    v6: Node<T>,
    len: usize,
}

impl<T> Default for IpTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IpTrie<T> {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self {
            v4: Node::new(),
            v6: Node::new(),
            len: 0,
        }
    }

    /// Insert a network, masking off host bits. Returns the tag it replaced.
    pub fn insert(&mut self, network: IpNetwork, tag: T) -> Option<T> {
        let network = IpNetwork::new(network.network(), network.prefix()).unwrap_or(network);
        let (key, width) = key_of(network.network());
        let mut node = match network {
            IpNetwork::V4(_) => &mut self.v4,
            IpNetwork::V6(_) => &mut self.v6,
        };
        for depth in 0..network.prefix() {
            let bit = bit_at(key, width, depth);
            node = &mut **node.children[bit].get_or_insert_with(|| Box::new(Node::new()));
        }
        let replaced = node.entry.replace((network, tag)).map(|(_, old)| old);
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    /// The most specific entry containing `ip`.
    pub fn longest_match(&self, ip: IpAddr) -> Option<(IpNetwork, &T)> {
        let (key, width) = key_of(ip);
        let mut node = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        };
        let mut best = node.entry.as_ref();
        for depth in 0..width {
            match &node.children[bit_at(key, width, depth)] {
                Some(child) => {
                    node = &**child;
                    if node.entry.is_some() {
                        best = node.entry.as_ref();
                    }
                }
                None => break,
            }
        }
        best.map(|(network, tag)| (*network, tag))
    }

    /// Whether any entry contains `ip`.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.longest_match(ip).is_some()
    }

    /// Number of distinct networks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the trie holds no networks.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> FromIterator<(IpNetwork, T)> for IpTrie<T> {
    fn from_iter<I: IntoIterator<Item = (IpNetwork, T)>>(iter: I) -> Self {
        let mut trie = IpTrie::new();
        for (network, tag) in iter {
            trie.insert(network, tag);
        }
        trie
    }
}

fn key_of(ip: IpAddr) -> (u128, u8) {
    match ip {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

fn bit_at(key: u128, width: u8, depth: u8) -> usize {
    ((key >> (width - 1 - depth)) & 1) as usize
}
