// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use crate::LPort;
use crate::PpgNum;
use crate::QueueNum;
use crate::TofinoFamily;

/// Hysteresis values are stored in the hardware with 8-cell granularity.
pub const HYST_QUANTUM: u32 = 8;

/// The port-level WAC limits are stored in units of 8 cells.
pub const WAC_LIMIT_QUANTUM: u32 = 8;

impl TofinoFamily {
    /// The hysteresis value the hardware falls back to when it can't
    /// represent the one that was programmed.
    pub fn default_hysteresis(&self) -> u32 {
        match self {
            TofinoFamily::Tofino1 => 64,
            TofinoFamily::Tofino2 | TofinoFamily::Tofino3 => 32,
        }
    }
}

/// The static dimensions of the Traffic Manager on a single device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TmSizing {
    pub pipes: u8,
    pub ports_per_pipe: u8,
    pub ports_per_pg: u8,
    pub queues_per_pg: u16,
    pub pfc_ppgs_per_pipe: u16,
    pub ig_pools: u8,
    pub eg_pools: u8,
    pub mc_fifos: u8,
    pub icos_levels: u8,
    pub q_map_slots: u8,
    /// Size of a buffer cell, in bytes.
    pub cell_size: u32,
}

impl TmSizing {
    pub fn for_family(family: TofinoFamily) -> Self {
        match family {
            TofinoFamily::Tofino1 => TmSizing {
                pipes: 4,
                ports_per_pipe: 72,
                ports_per_pg: 4,
                queues_per_pg: 32,
                pfc_ppgs_per_pipe: 128,
                ig_pools: 4,
                eg_pools: 4,
                mc_fifos: 4,
                icos_levels: 8,
                q_map_slots: 16,
                cell_size: 80,
            },
            TofinoFamily::Tofino2 => TmSizing {
                pipes: 4,
                ports_per_pipe: 72,
                ports_per_pg: 8,
                queues_per_pg: 128,
                pfc_ppgs_per_pipe: 128,
                ig_pools: 4,
                eg_pools: 4,
                mc_fifos: 4,
                icos_levels: 8,
                q_map_slots: 16,
                cell_size: 176,
            },
            TofinoFamily::Tofino3 => TmSizing {
                pipes: 8,
                ..TmSizing::for_family(TofinoFamily::Tofino2)
            },
        }
    }

    pub fn pgs_per_pipe(&self) -> u8 {
        self.ports_per_pipe / self.ports_per_pg
    }

    /// PFC PPGs plus one default PPG per port.
    pub fn ppgs_per_pipe(&self) -> u16 {
        self.pfc_ppgs_per_pipe + u16::from(self.ports_per_pipe)
    }

    pub fn queues_per_pipe(&self) -> u16 {
        u16::from(self.pgs_per_pipe()) * self.queues_per_pg
    }

    /// Number of queues each port receives when its port group is carved
    /// evenly.
    pub fn default_queues_per_port(&self) -> u16 {
        self.queues_per_pg / u16::from(self.ports_per_pg)
    }

    pub fn port_group(&self, port: LPort) -> u8 {
        port / self.ports_per_pg
    }

    /// The port's channel within its port group.
    pub fn port_channel(&self, port: LPort) -> u8 {
        port % self.ports_per_pg
    }

    /// Physical index of the first queue in the port's port group.
    pub fn pg_base_queue(&self, port: LPort) -> QueueNum {
        u16::from(self.port_group(port)) * self.queues_per_pg
    }

    /// The default PPG belonging to a port sits after all of the PFC PPGs.
    pub fn default_ppg(&self, port: LPort) -> PpgNum {
        self.pfc_ppgs_per_pipe + u16::from(port)
    }

    pub fn is_default_ppg(&self, ppg: PpgNum) -> bool {
        ppg >= self.pfc_ppgs_per_pipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing() {
        let t1 = TmSizing::for_family(TofinoFamily::Tofino1);
        assert_eq!(t1.pgs_per_pipe(), 18);
        assert_eq!(t1.queues_per_pipe(), 576);
        assert_eq!(t1.default_queues_per_port(), 8);
        assert_eq!(t1.ppgs_per_pipe(), 200);

        let t3 = TmSizing::for_family(TofinoFamily::Tofino3);
        assert_eq!(t3.pipes, 8);
        assert_eq!(t3.ports_per_pg, 8);
        assert_eq!(t3.default_queues_per_port(), 16);
    }

    #[test]
    fn test_port_addressing() {
        let t2 = TmSizing::for_family(TofinoFamily::Tofino2);
        assert_eq!(t2.port_group(17), 2);
        assert_eq!(t2.port_channel(17), 1);
        assert_eq!(t2.pg_base_queue(17), 256);
        assert_eq!(t2.default_ppg(17), 145);
        assert!(t2.is_default_ppg(145));
        assert!(!t2.is_default_ppg(127));
    }
}
