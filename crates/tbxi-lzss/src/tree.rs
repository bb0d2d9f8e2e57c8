//! Binary search tree over the sliding dictionary, used by the
//! compressor to find the longest prior match for the string starting
//! at each ring-buffer position.
//!
//! One tree per possible first byte (256 trees, rooted at indices
//! `N+1 ..= N+256` of a shared `rchild` array) — this is Okumura's
//! original scheme, ported directly rather than reinvented.

use crate::{F, N};

const NIL: usize = N;

pub struct Tree {
    lchild: Vec<usize>,
    rchild: Vec<usize>,
    parent: Vec<usize>,
}

impl Tree {
    pub fn new() -> Self {
        let mut rchild = vec![0usize; N + 257];
        for slot in &mut rchild[N + 1..N + 257] {
            *slot = NIL;
        }
        let mut parent = vec![0usize; N + 1];
        for slot in &mut parent[0..N] {
            *slot = NIL;
        }
        Self {
            lchild: vec![0usize; N + 1],
            rchild,
            parent,
        }
    }

    /// Inserts the string of length `F` starting at `text_buf[r..]` into
    /// the tree rooted on its first byte. Returns the longest prior
    /// match found for that string as `(match_position, match_length)`.
    pub fn insert_node(&mut self, r: usize, text_buf: &[u8]) -> (usize, usize) {
        let key = &text_buf[r..];
        let mut p = N + 1 + key[0] as usize;
        self.rchild[r] = NIL;
        self.lchild[r] = NIL;

        let mut match_length = 0usize;
        let mut match_position = 0usize;
        let mut cmp: i32 = 1;

        loop {
            if cmp >= 0 {
                if self.rchild[p] != NIL {
                    p = self.rchild[p];
                } else {
                    self.rchild[p] = r;
                    self.parent[r] = p;
                    return (match_position, match_length);
                }
            } else if self.lchild[p] != NIL {
                p = self.lchild[p];
            } else {
                self.lchild[p] = r;
                self.parent[r] = p;
                return (match_position, match_length);
            }

            let mut i = 1;
            while i < F {
                cmp = key[i] as i32 - text_buf[p + i] as i32;
                if cmp != 0 {
                    break;
                }
                i += 1;
            }

            if i > match_length {
                match_position = p;
                match_length = i;
                if match_length >= F {
                    break;
                }
            }
        }

        self.parent[r] = self.parent[p];
        self.lchild[r] = self.lchild[p];
        self.rchild[r] = self.rchild[p];
        self.parent[self.lchild[p]] = r;
        self.parent[self.rchild[p]] = r;

        if self.rchild[self.parent[p]] == p {
            self.rchild[self.parent[p]] = r;
        } else {
            self.lchild[self.parent[p]] = r;
        }
        self.parent[p] = NIL;

        (match_position, match_length)
    }

    /// Removes node `p` from whichever tree it currently belongs to.
    pub fn delete_node(&mut self, p: usize) {
        if self.parent[p] == NIL {
            return;
        }

        let q = if self.rchild[p] == NIL {
            self.lchild[p]
        } else if self.lchild[p] == NIL {
            self.rchild[p]
        } else {
            let mut q = self.lchild[p];
            if self.rchild[q] != NIL {
                loop {
                    q = self.rchild[q];
                    if self.rchild[q] == NIL {
                        break;
                    }
                }
                self.rchild[self.parent[q]] = self.lchild[q];
                self.parent[self.lchild[q]] = self.parent[q];
                self.lchild[q] = self.lchild[p];
                self.parent[self.lchild[p]] = q;
            }
            self.rchild[q] = self.rchild[p];
            self.parent[self.rchild[p]] = q;
            q
        };

        self.parent[q] = self.parent[p];
        if self.rchild[self.parent[p]] == p {
            self.rchild[self.parent[p]] = q;
        } else {
            self.lchild[self.parent[p]] = q;
        }
        self.parent[p] = NIL;
    }
}
