// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use crate::*;

// Total buffer, in cells.
fn cell_limit(family: TofinoFamily) -> u32 {
    match family {
        TofinoFamily::Tofino1 => 276_480,
        TofinoFamily::Tofino2 | TofinoFamily::Tofino3 => 374_784,
    }
}

// Only the first ingress and egress pools are carved at reset.
fn pool_limit(pool: u8, field: PoolField) -> u32 {
    match (pool, field) {
        (_, PoolField::ColorDropEnable) => 0,
        (0, _) => 131_072,
        _ => 0,
    }
}

/// The value a TM field holds after the device is reset.  This is also the
/// value the driver assumes for any field that has no hardware representation
/// on a given generation.
pub fn reset_value(family: TofinoFamily, reg: TmReg) -> u32 {
    let sizing = TmSizing::for_family(family);
    let hyst = family.default_hysteresis();

    match reg {
        TmReg::Global(field) => match field {
            GlobalField::SkidLimit => 4096,
            GlobalField::SkidHysteresis => hyst,
            GlobalField::NegMirrorLimit => 1024,
            GlobalField::CellLimit => cell_limit(family),
            GlobalField::UcCtSize => 256,
            GlobalField::McCtSize => 512,
        },
        TmReg::IgPool { pool, field } => pool_limit(pool, field),
        TmReg::IgPoolPfcLimit { .. } => 0,
        TmReg::EgPool { pool, field } => pool_limit(pool, field),
        TmReg::PreFifoLimit { .. } => 2048,
        TmReg::Ppg { ppg, field, .. } => match field {
            PpgField::IcosMask if sizing.is_default_ppg(ppg) => 0xff,
            PpgField::AppLimit => 4096,
            PpgField::DynBaf => 7,
            PpgField::Hysteresis => hyst,
            _ => 0,
        },
        TmReg::PortIcosPpg { port, .. } => u32::from(sizing.default_ppg(port)),
        TmReg::QProfile { profile, .. } => {
            u32::from(sizing.port_channel(profile))
                * u32::from(sizing.default_queues_per_port())
        }
        TmReg::QProfileMap { slot, .. } => {
            u32::from(slot) % u32::from(sizing.default_queues_per_port())
        }
        TmReg::Port { port, field, .. } => match field {
            PortField::QidProfile => u32::from(port),
            PortField::IgLimit | PortField::EgLimit => 4096,
            PortField::IgHysteresis | PortField::EgHysteresis => hyst,
            PortField::CtLimit => 16,
            _ => 0,
        },
        TmReg::Queue { field, .. } => match field {
            QueueField::MinLimit => 20,
            QueueField::AppLimit => 4096,
            QueueField::DynBaf => 7,
            QueueField::YellowLimitPct | QueueField::RedLimitPct => 100,
            QueueField::TailDropEnable | QueueField::SchedEnable => 1,
            QueueField::DwrrWeight => 1023,
            _ => 0,
        },
        TmReg::Pipe { field, .. } => match field {
            PipeField::EgLimit => 65_536,
            PipeField::EgHysteresis => hyst,
            PipeField::IfgCompensation => 20,
            _ => 0,
        },
        TmReg::McFifo { fifo, field, .. } => match field {
            McFifoField::IcosBmap => 0x3 << (2 * u32::from(fifo % 4)),
            McFifoField::Depth => match family {
                TofinoFamily::Tofino1 => 448,
                _ => 1024,
            },
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ppg_mapping() {
        let family = TofinoFamily::Tofino1;
        let reg = TmReg::PortIcosPpg {
            pipe: 0,
            port: 5,
            icos: 3,
        };
        assert_eq!(reset_value(family, reg), 133);

        let reg = TmReg::Ppg {
            pipe: 0,
            ppg: 133,
            field: PpgField::IcosMask,
        };
        assert_eq!(reset_value(family, reg), 0xff);
    }

    #[test]
    fn test_default_queue_carving() {
        let family = TofinoFamily::Tofino2;
        let base = |profile| {
            reset_value(
                family,
                TmReg::QProfile {
                    pipe: 0,
                    profile,
                    field: QProfileField::BaseQueue,
                },
            )
        };
        assert_eq!(base(0), 0);
        assert_eq!(base(3), 48);
        assert_eq!(base(8), 0);

        let slot = TmReg::QProfileMap {
            pipe: 0,
            profile: 0,
            slot: 15,
        };
        assert_eq!(reset_value(family, slot), 15);
    }
}
