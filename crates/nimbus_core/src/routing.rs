//! Static multi-hop routing table.
//!
//! Routes are loaded once from a whitespace-separated text file and are
//! immutable afterwards. Lookups key on Szudzik's pairing of the source and
//! destination identifiers, which maps two 32-bit values onto a unique
//! 64-bit key.
//!
//! A route's path lists the LPs that are explicitly addressed while a
//! message travels: the first hop consulted by the submitter, every hop a
//! forwarding service must reach next, and the destination last. Links
//! deliver to their configured ends and never appear mid-path on their own
//! account.

use crate::{Lpid, SimError};
use std::collections::HashMap;
use std::path::Path;

/// Szudzik's pairing function.
///
/// `a >= b ? a*a + a + b : a + b*b` — unique for every pair of unsigned
/// 32-bit inputs, fitting a 64-bit output without collision.
#[inline]
pub fn szudzik(a: u32, b: u32) -> u64 {
    let a = a as u64;
    let b = b as u64;
    if a >= b {
        a * a + a + b
    } else {
        a + b * b
    }
}

/// An ordered, non-empty hop sequence from a source to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    path: Vec<Lpid>,
}

impl Route {
    /// Build a route from its hops. Empty paths are rejected at parse time,
    /// so this is crate-internal.
    fn new(path: Vec<Lpid>) -> Self {
        debug_assert!(!path.is_empty());
        Self { path }
    }

    /// The hop at `offset`, if within the path.
    pub fn hop(&self, offset: u32) -> Option<Lpid> {
        self.path.get(offset as usize).copied()
    }

    /// The first hop to address when submitting along this route.
    pub fn first_hop(&self) -> Lpid {
        self.path[0]
    }

    /// The final destination.
    pub fn destination(&self) -> Lpid {
        self.path[self.path.len() - 1]
    }

    /// Number of hops in the path.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Routes are never empty; kept for iterator-style call sites.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The full path.
    pub fn path(&self) -> &[Lpid] {
        &self.path
    }
}

/// Mapping `(src, dest) -> Route`, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<u64, Route>,
    counts: HashMap<Lpid, u32>,
}

impl RoutingTable {
    /// An empty table, populated via [`RoutingTable::insert`] or the loaders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the route from `src` to `dest`.
    ///
    /// Used by the file loader and by programmatic topology builders.
    pub fn insert(&mut self, src: Lpid, dest: Lpid, path: Vec<Lpid>) {
        self.routes
            .insert(szudzik(src as u32, dest as u32), Route::new(path));
        *self.counts.entry(src).or_insert(0) += 1;
    }

    /// Load routes from text: one route per line, `src dst h1 ... hN` in
    /// ASCII decimal. Blank lines are errors.
    pub fn load_str(&mut self, contents: &str) -> Result<(), SimError> {
        for (index, line) in contents.lines().enumerate() {
            let line_no = index + 1;

            if line.trim().is_empty() {
                return Err(SimError::MalformedRoute {
                    line: line_no,
                    reason: "blank line".into(),
                });
            }

            let mut fields = line.split_whitespace().map(|field| {
                field.parse::<Lpid>().map_err(|_| SimError::MalformedRoute {
                    line: line_no,
                    reason: format!("`{field}` is not an LP identifier"),
                })
            });

            let src = fields.next().ok_or(SimError::MalformedRoute {
                line: line_no,
                reason: "missing source".into(),
            })??;
            let dest = fields.next().ok_or(SimError::MalformedRoute {
                line: line_no,
                reason: "missing destination".into(),
            })??;

            let path = fields.collect::<Result<Vec<_>, _>>()?;
            if path.is_empty() {
                return Err(SimError::MalformedRoute {
                    line: line_no,
                    reason: "route has no hops".into(),
                });
            }

            self.insert(src, dest, path);
        }

        Ok(())
    }

    /// Load routes from a file.
    pub fn load_path<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SimError> {
        let contents = std::fs::read_to_string(path)?;
        self.load_str(&contents)
    }

    /// The route from `src` to `dest`.
    pub fn get_route(&self, src: Lpid, dest: Lpid) -> Result<&Route, SimError> {
        self.routes
            .get(&szudzik(src as u32, dest as u32))
            .ok_or(SimError::NoRoute { src, dest })
    }

    /// Number of routes originating at `src`.
    ///
    /// Used by masters to sanity-check that every slave is reachable.
    pub fn count_routes(&self, src: Lpid) -> u32 {
        self.counts.get(&src).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn szudzik_matches_definition() {
        assert_eq!(szudzik(0, 0), 0);
        assert_eq!(szudzik(1, 0), 2);
        assert_eq!(szudzik(0, 1), 1);
        assert_eq!(szudzik(2, 2), 8);
    }

    #[test]
    fn szudzik_is_injective_on_a_grid() {
        let mut seen = std::collections::HashSet::new();
        for a in 0..64u32 {
            for b in 0..64u32 {
                assert!(seen.insert(szudzik(a, b)), "collision at ({a}, {b})");
            }
        }
    }

    #[test]
    fn load_and_lookup_round_trip() {
        let mut table = RoutingTable::new();
        table.load_str("0 2 1 2\n0 4 1 3 4\n").unwrap();

        let route = table.get_route(0, 4).unwrap();
        assert_eq!(route.path(), &[1, 3, 4]);
        assert_eq!(route.first_hop(), 1);
        assert_eq!(route.destination(), 4);
        assert_eq!(table.count_routes(0), 2);
        assert_eq!(table.count_routes(2), 0);
    }

    #[test]
    fn blank_line_is_error() {
        let mut table = RoutingTable::new();
        let result = table.load_str("0 2 1 2\n\n0 4 1 4\n");
        assert!(matches!(
            result,
            Err(SimError::MalformedRoute { line: 2, .. })
        ));
    }

    #[test]
    fn hopless_route_is_error() {
        let mut table = RoutingTable::new();
        let result = table.load_str("0 2\n");
        assert!(matches!(result, Err(SimError::MalformedRoute { .. })));
    }

    #[test]
    fn garbage_field_is_error() {
        let mut table = RoutingTable::new();
        let result = table.load_str("0 two 1 2\n");
        assert!(matches!(result, Err(SimError::MalformedRoute { .. })));
    }

    #[test]
    fn missing_route_faults() {
        let table = RoutingTable::new();
        let result = table.get_route(5, 9);
        assert!(matches!(result, Err(SimError::NoRoute { src: 5, dest: 9 })));
    }

    #[test]
    fn single_hop_route() {
        let mut table = RoutingTable::new();
        table.load_str("0 2 2\n").unwrap();

        let route = table.get_route(0, 2).unwrap();
        assert_eq!(route.len(), 1);
        assert_eq!(route.first_hop(), route.destination());
        assert_eq!(route.hop(1), None);
    }
}
