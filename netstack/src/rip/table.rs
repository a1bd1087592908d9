use crate::config::{parse_addr, records};
use crate::error::{Error, Result};
use crate::route::longest_prefix_match;
use crate::timer::Timer;
use netstack_packets::{RipEntry, RIP_MAX_ENTRIES, RIP_METRIC_INFINITY};
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// How long a learned route lives without being re-advertised.
pub const RIP_ROUTE_LIFETIME: Duration = Duration::from_millis(180_000);

/// Number of slots in a RIP route table.
pub const RIP_TABLE_CAPACITY: usize = RIP_MAX_ENTRIES;

#[derive(Clone, Debug)]
struct Slot {
    route: Box<RipEntry>,
    timer: Timer,
}

/// The dynamic route table: a fixed number of slots, each either empty or holding one route
/// together with the timer that ages it out.
///
/// Routes keep their slot index for as long as they live, so indices handed out by `add`,
/// `find` and `lookup_best` stay valid until that route is removed.
#[derive(Clone, Debug)]
pub struct RipTable {
    slots: Vec<Option<Slot>>,
}

impl Default for RipTable {
    fn default() -> Self {
        RipTable {
            slots: (0..RIP_TABLE_CAPACITY).map(|_| None).collect(),
        }
    }
}

impl RipTable {
    pub fn new() -> RipTable {
        RipTable::default()
    }

    /// Stores `route` in the first free slot and arms its timer for the default lifetime.
    pub fn add(&mut self, route: RipEntry) -> Result<usize> {
        self.add_with_lifetime(route, RIP_ROUTE_LIFETIME)
    }

    pub fn add_with_lifetime(&mut self, route: RipEntry, lifetime: Duration) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TableFull)?;
        self.slots[index] = Some(Slot {
            route: Box::new(route),
            timer: Timer::started(lifetime),
        });
        Ok(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<RipEntry> {
        self.slots
            .get_mut(index)
            .and_then(Option::take)
            .map(|slot| *slot.route)
    }

    pub fn get(&self, index: usize) -> Option<&RipEntry> {
        self.slot(index).map(|slot| &*slot.route)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RipEntry> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .map(|slot| &mut *slot.route)
    }

    pub fn timer(&self, index: usize) -> Option<&Timer> {
        self.slot(index).map(|slot| &slot.timer)
    }

    /// Re-arms the timer of the route in `index`. Returns false for an empty slot.
    pub fn reset_timer(&mut self, index: usize, lifetime: Duration) -> bool {
        match self.slots.get_mut(index).and_then(Option::as_mut) {
            Some(slot) => {
                slot.timer.reset(lifetime);
                true
            }
            None => false,
        }
    }

    /// Slot of the route for exactly `subnet`/`mask`, whatever its metric or next hop.
    pub fn find(&self, subnet: Ipv4Addr, mask: Ipv4Addr) -> Option<usize> {
        self.iter()
            .find(|(_, route)| route.subnet == subnet && route.mask == mask)
            .map(|(index, _)| index)
    }

    /// Slot of the route with the longest prefix covering `addr`.
    pub fn lookup_best(&self, addr: Ipv4Addr) -> Option<usize> {
        longest_prefix_match(self.iter(), addr, |(_, route)| (route.subnet, route.mask))
            .map(|(index, _)| index)
    }

    /// Drops every route whose timer ran out or whose metric is infinite.
    /// Returns how many were removed.
    pub fn remove_expired(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            let expired = match slot {
                Some(occupied) => occupied.timer.is_expired() || occupied.route.is_infinite(),
                None => false,
            };
            if expired {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    /// Shortest remaining lifetime among the stored routes, `None` when the table is empty.
    pub fn time_left(&self) -> Option<Duration> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.timer.remaining())
            .min()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &RipEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, &*slot.route)))
    }

    /// Copies of all stored routes in index order.
    pub fn routes(&self) -> Vec<RipEntry> {
        self.iter().map(|(_, route)| *route).collect()
    }

    fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Reads `subnet mask gateway metric` lines. Every route gets the default lifetime.
    pub fn read(path: impl AsRef<Path>) -> Result<RipTable> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(Error::Io)?;
        RipTable::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<RipTable> {
        let mut table = RipTable::new();
        for (line, fields) in records(text) {
            if fields.len() != 4 {
                return Err(Error::config(
                    path,
                    line,
                    "expected `subnet mask gateway metric`",
                ));
            }
            let metric = match fields[3].parse::<u32>() {
                Ok(metric) if metric >= 1 && metric <= RIP_METRIC_INFINITY => metric,
                _ => {
                    return Err(Error::config(
                        path,
                        line,
                        format!("metric must be 1 to 16, not `{}`", fields[3]),
                    ))
                }
            };
            let route = RipEntry::new(
                parse_addr(path, line, fields[0])?,
                parse_addr(path, line, fields[1])?,
                parse_addr(path, line, fields[2])?,
                metric,
            );
            table
                .add(route)
                .map_err(|_| Error::config(path, line, "route table is full"))?;
        }
        Ok(table)
    }

    /// Rewrites `path` with the current routes.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut text = format!(
            "# {}\n#\n# SubnetAddr  \tSubnetMask  \tGateway  \tMetric\n",
            path.display()
        );
        for (_, route) in self.iter() {
            text.push_str(&format!(
                "{:<15}\t{:<15}\t{}\t{}\n",
                route.subnet.to_string(),
                route.mask.to_string(),
                route.next_hop,
                route.metric
            ));
        }
        fs::write(path, text).map_err(Error::Io)
    }
}

/// One line per route with the milliseconds it has left.
impl fmt::Display for RipTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "# SubnetAddr  \tSubnetMask  \tGateway  \tMetric\tTimer")?;
        for slot in self.slots.iter().flatten() {
            let route = &slot.route;
            writeln!(
                f,
                "{:<15}\t{:<15}\t{}\t{}\t{}",
                route.subnet.to_string(),
                route.mask.to_string(),
                route.next_hop,
                route.metric,
                slot.timer.remaining().as_millis()
            )?;
        }
        Ok(())
    }
}
