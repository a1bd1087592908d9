use crate::config::{parse_addr, records};
use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::trace;

/// Most routes a static table holds.
pub const ROUTE_TABLE_CAPACITY: usize = 256;

/// True if `addr` falls inside `subnet`/`mask`.
pub fn covers(subnet: Ipv4Addr, mask: Ipv4Addr, addr: Ipv4Addr) -> bool {
    let mask = u32::from(mask);
    u32::from(addr) & mask == u32::from(subnet) & mask
}

/// Number of one bits in `mask`.
pub fn prefix_len(mask: Ipv4Addr) -> u32 {
    u32::from(mask).count_ones()
}

/// Picks, among `candidates` whose prefix covers `addr`, the one with the longest mask.
/// On equal lengths the earliest candidate wins.
pub(crate) fn longest_prefix_match<T, I, F>(candidates: I, addr: Ipv4Addr, prefix: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> (Ipv4Addr, Ipv4Addr),
{
    let mut best: Option<(u32, T)> = None;
    for candidate in candidates {
        let (subnet, mask) = prefix(&candidate);
        if !covers(subnet, mask, addr) {
            continue;
        }
        let len = prefix_len(mask);
        if best.as_ref().map_or(true, |(best_len, _)| len > *best_len) {
            best = Some((len, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// One static route. A gateway of `0.0.0.0` marks a directly attached network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub subnet: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Route {
    pub fn new(subnet: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> Route {
        Route {
            subnet,
            mask,
            gateway,
        }
    }

    pub fn covers(&self, addr: Ipv4Addr) -> bool {
        covers(self.subnet, self.mask, addr)
    }

    pub fn is_direct(&self) -> bool {
        self.gateway.is_unspecified()
    }

    /// The address to resolve at the link layer when sending to `dest` over this route.
    pub fn next_hop(&self, dest: Ipv4Addr) -> Ipv4Addr {
        if self.is_direct() {
            dest
        } else {
            self.gateway
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{} via {}", self.subnet, self.mask, self.gateway)
    }
}

/// Ordered, fixed-capacity table of static routes, read once when the IPv4 layer opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }

    /// Appends a route, returning its index.
    pub fn add(&mut self, route: Route) -> Result<usize> {
        if self.routes.len() >= ROUTE_TABLE_CAPACITY {
            return Err(Error::TableFull);
        }
        self.routes.push(route);
        Ok(self.routes.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Option<Route> {
        if index < self.routes.len() {
            Some(self.routes.remove(index))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// The covering route with the longest mask, if any.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&Route> {
        let found = longest_prefix_match(&self.routes, dest, |route| (route.subnet, route.mask));
        trace!(%dest, route = ?found, "static route lookup");
        found
    }

    /// Reads `subnet mask gateway` lines, skipping blanks and `#` comments.
    pub fn read(path: impl AsRef<Path>) -> Result<RouteTable> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(Error::Io)?;
        RouteTable::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<RouteTable> {
        let mut table = RouteTable::new();
        for (line, fields) in records(text) {
            if fields.len() != 3 {
                return Err(Error::config(path, line, "expected `subnet mask gateway`"));
            }
            let route = Route::new(
                parse_addr(path, line, fields[0])?,
                parse_addr(path, line, fields[1])?,
                parse_addr(path, line, fields[2])?,
            );
            table
                .add(route)
                .map_err(|_| Error::config(path, line, "too many routes"))?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn addr(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let wide = Route::new(addr(10, 0, 0, 0), addr(255, 0, 0, 0), addr(192, 168, 0, 1));
        let narrow = Route::new(addr(10, 1, 0, 0), addr(255, 255, 0, 0), addr(192, 168, 0, 2));

        let mut table = RouteTable::new();
        table.add(wide).unwrap();
        table.add(narrow).unwrap();
        assert_eq!(table.lookup(addr(10, 1, 2, 3)), Some(&narrow));
        assert_eq!(table.lookup(addr(10, 2, 0, 1)), Some(&wide));

        let mut reversed = RouteTable::new();
        reversed.add(narrow).unwrap();
        reversed.add(wide).unwrap();
        assert_eq!(reversed.lookup(addr(10, 1, 2, 3)), Some(&narrow));
    }

    #[test]
    fn default_route_and_no_route() {
        let mut table = RouteTable::new();
        table
            .add(Route::new(addr(192, 168, 1, 0), addr(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED))
            .unwrap();
        assert_eq!(table.lookup(addr(8, 8, 8, 8)), None);

        let gateway = addr(192, 168, 1, 254);
        let default = Route::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, gateway);
        table.add(default).unwrap();
        assert_eq!(table.lookup(addr(8, 8, 8, 8)), Some(&default));
        assert!(table.lookup(addr(192, 168, 1, 7)).unwrap().is_direct());
    }

    #[test]
    fn equal_prefixes_keep_the_first() {
        let first = Route::new(addr(10, 0, 0, 0), addr(255, 0, 0, 0), addr(1, 1, 1, 1));
        let second = Route::new(addr(10, 0, 0, 0), addr(255, 0, 0, 0), addr(2, 2, 2, 2));
        let mut table = RouteTable::new();
        table.add(first).unwrap();
        table.add(second).unwrap();
        assert_eq!(table.lookup(addr(10, 9, 9, 9)), Some(&first));
    }

    #[test]
    fn next_hop_of_direct_route_is_destination() {
        let direct = Route::new(addr(10, 0, 0, 0), addr(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(direct.next_hop(addr(10, 0, 0, 9)), addr(10, 0, 0, 9));
        let via = Route::new(addr(10, 0, 1, 0), addr(255, 255, 255, 0), addr(10, 0, 0, 1));
        assert_eq!(via.next_hop(addr(10, 0, 1, 9)), addr(10, 0, 0, 1));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = RouteTable::new();
        let route = Route::new(addr(10, 0, 0, 0), addr(255, 0, 0, 0), Ipv4Addr::UNSPECIFIED);
        for _ in 0..ROUTE_TABLE_CAPACITY {
            table.add(route).unwrap();
        }
        match table.add(route) {
            Err(Error::TableFull) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(table.remove(0), Some(route));
        assert_eq!(table.remove(ROUTE_TABLE_CAPACITY), None);
    }

    #[test]
    fn reads_route_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# subnet mask gateway").unwrap();
        writeln!(file, "0.0.0.0 0.0.0.0 10.0.0.254").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "10.0.0.0\t255.255.255.0\t0.0.0.0").unwrap();

        let table = RouteTable::read(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().gateway, addr(10, 0, 0, 254));
        assert!(table.get(1).unwrap().is_direct());
    }

    #[test]
    fn malformed_route_line() {
        match RouteTable::parse(Path::new("routes"), "10.0.0.0 255.0.0.0\n") {
            Err(Error::Config { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
