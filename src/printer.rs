//! Ordered rendering of a hop table.
use std::io::{self, Write};

use crate::hop_table::{HopTable, Slot};
use crate::timestamp::as_millis_f64;

/// Print cursor over a [`HopTable`].
///
/// Each call to [`HopPrinter::flush`] writes the resolved slots that follow
/// the cursor, in hop order then slot order, and stops at the first pending
/// slot. Output order is therefore independent of the order replies arrive in.
#[derive(Clone, Debug)]
pub struct HopPrinter {
    next_hop: u16,
    next_slot: usize,
}

impl HopPrinter {
    pub fn new(first_ttl: u8) -> Self {
        HopPrinter {
            next_hop: first_ttl as u16,
            next_slot: 0,
        }
    }

    /// The hop the next slot belongs to.
    pub fn next_hop(&self) -> u16 {
        self.next_hop
    }

    /// Whether every hop up to `last_hop` has been printed.
    pub fn is_done(&self, last_hop: u8) -> bool {
        self.next_hop > last_hop as u16
    }

    /// Write the resolved slots after the cursor, up to `last_hop` (or the
    /// table's last hop). Returns the number of slots written.
    pub fn flush(
        &mut self,
        table: &HopTable,
        last_hop: Option<u8>,
        out: &mut dyn Write,
    ) -> io::Result<usize> {
        let last_hop = last_hop.unwrap_or(table.max_ttl()).min(table.max_ttl());
        let mut written = 0;
        while !self.is_done(last_hop) {
            let ttl = self.next_hop as u8;
            let slot = match table.slot(ttl, self.next_slot) {
                Some(slot) if !slot.is_pending() => slot,
                _ => break,
            };
            if self.next_slot == 0 {
                write!(out, "{ttl:>2}  ")?;
            }
            match slot {
                Slot::Responded { addr, rtt } => {
                    write!(out, "{}  {:.3} ms  ", addr, as_millis_f64(*rtt))?
                }
                _ => write!(out, "*  ")?,
            }
            written += 1;
            self.next_slot += 1;
            if self.next_slot == table.queries() {
                writeln!(out)?;
                self.next_hop += 1;
                self.next_slot = 0;
            }
        }
        if written > 0 {
            out.flush()?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::{Duration, SystemTime};

    use crate::hop_table::HopTable;
    use crate::printer::HopPrinter;

    const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn render(printer: &mut HopPrinter, table: &HopTable, last_hop: Option<u8>) -> String {
        let mut out = Vec::new();
        printer.flush(table, last_hop, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_out_of_order_replies() {
        let start = SystemTime::now();
        let mut table = HopTable::new(1, 3, 2);
        for ttl in 1..=2 {
            table.record_send(ttl, 0, start);
            table.record_send(ttl, 1, start);
        }
        let mut printer = HopPrinter::new(1);

        // Hop 2 completes first: nothing can be printed yet.
        table.record_reply(2, 0, ROUTER, start + Duration::from_millis(2));
        table.record_reply(2, 1, ROUTER, start + Duration::from_millis(2));
        assert_eq!(render(&mut printer, &table, None), "");

        table.record_reply(1, 0, ROUTER, start + Duration::from_millis(1));
        assert_eq!(render(&mut printer, &table, None), " 1  10.0.0.1  1.000 ms  ");

        table.sweep_timeouts(start + Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(
            render(&mut printer, &table, None),
            "*  \n 2  10.0.0.1  2.000 ms  10.0.0.1  2.000 ms  \n"
        );
        assert_eq!(printer.next_hop(), 3);
        assert!(!printer.is_done(3));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let start = SystemTime::now();
        let mut table = HopTable::new(1, 1, 3);
        for offset in 0..3 {
            table.record_send(1, offset, start);
        }
        table.sweep_timeouts(start, Duration::ZERO);
        let mut printer = HopPrinter::new(1);
        assert_eq!(render(&mut printer, &table, None), " 1  *  *  *  \n");
        assert_eq!(render(&mut printer, &table, None), "");
        assert!(printer.is_done(1));
    }

    #[test]
    fn test_last_hop_bounds_output() {
        let start = SystemTime::now();
        let mut table = HopTable::new(1, 3, 1);
        for ttl in 1..=3 {
            table.record_send(ttl, 0, start);
        }
        table.sweep_timeouts(start, Duration::ZERO);
        let mut printer = HopPrinter::new(1);
        assert_eq!(render(&mut printer, &table, Some(2)), " 1  *  \n 2  *  \n");
        assert!(printer.is_done(2));
    }
}
