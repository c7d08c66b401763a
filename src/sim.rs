//! Register-shadow models of the controllers, for running the drivers on a
//! host.
//!
//! Each model implements [`RegisterBank`] (or [`CsrAccess`]) and keeps its
//! registers in memory. The PLIC and bus error unit models add the side
//! effects the drivers rely on: arbitration on claim reads, and fault
//! latching gated by the enable register. [`SimBoard`] wires a complete
//! [`Platform`] out of them for a [`DeviceTable`].

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use axaddrspace::device::AccessWidth;
use axerrno::{ax_err, AxResult};
use bitmaps::Bitmap;
use spin::Mutex;

use crate::buserror::{BusErrorEvents, BusErrorUnit};
use crate::consts::*;
use crate::controller::{Controller, ControllerId, ControllerKind, InterruptController};
use crate::device::{DeviceTable, Wiring};
use crate::regs::{Csr, CsrAccess, RegisterBank};
use crate::utils::width_bytes;
use crate::{Clint, CpuLocal, Expander, InterruptId, Platform, Plic};

/// In-memory CSR file of one hart.
pub struct ShadowCsrs {
    regs: Mutex<[usize; Csr::COUNT]>,
}

impl ShadowCsrs {
    pub fn new(hart: usize) -> Self {
        let csrs = Self {
            regs: Mutex::new([0; Csr::COUNT]),
        };
        csrs.set_hart_id(hart);
        csrs
    }

    /// Changes the hart this CSR file reports as executing.
    pub fn set_hart_id(&self, hart: usize) {
        self.poke(Csr::Mhartid, hart);
    }

    /// Stores `val` in any CSR, read-only ones included.
    pub fn poke(&self, csr: Csr, val: usize) {
        self.regs.lock()[csr.index()] = val;
    }

    pub fn snapshot(&self) -> [usize; Csr::COUNT] {
        *self.regs.lock()
    }
}

impl CsrAccess for ShadowCsrs {
    fn read(&self, csr: Csr) -> usize {
        self.regs.lock()[csr.index()]
    }

    fn write(&self, csr: Csr, val: usize) {
        match csr {
            Csr::Mhartid | Csr::Mcycle | Csr::Minstret => {}
            csr => self.poke(csr, val),
        }
    }
}

/// Plain little-endian register storage without side effects.
pub struct ShadowBank {
    bytes: Mutex<Vec<u8>>,
}

impl ShadowBank {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

fn byte_range(len: usize, offset: usize, width: AccessWidth) -> AxResult<core::ops::Range<usize>> {
    match offset.checked_add(width_bytes(width)) {
        Some(end) if end <= len => Ok(offset..end),
        _ => ax_err!(BadAddress, "register access outside the bank"),
    }
}

impl RegisterBank for ShadowBank {
    fn read(&self, offset: usize, width: AccessWidth) -> AxResult<usize> {
        let bytes = self.bytes.lock();
        let range = byte_range(bytes.len(), offset, width)?;
        Ok(bytes[range]
            .iter()
            .rev()
            .fold(0usize, |val, byte| (val << 8) | *byte as usize))
    }

    fn write(&self, offset: usize, width: AccessWidth, val: usize) -> AxResult {
        let mut bytes = self.bytes.lock();
        let range = byte_range(bytes.len(), offset, width)?;
        for (shift, byte) in bytes[range].iter_mut().enumerate() {
            *byte = (val >> (shift * 8)) as u8;
        }
        Ok(())
    }
}

/// Register state of a [`PlicModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlicState {
    pub priority: [u32; PLIC_NUM_SOURCES],
    pub pending: Bitmap<PLIC_NUM_SOURCES>,
    /// Claimed and not yet completed.
    pub active: Bitmap<PLIC_NUM_SOURCES>,
    pub enable: Vec<Bitmap<PLIC_NUM_SOURCES>>,
    pub threshold: Vec<u32>,
    /// Outstanding claim of each context.
    pub claimed: Vec<Option<InterruptId>>,
}

/// A PLIC 1.0.0 register map with claim arbitration.
///
/// Writes to the pending region raise sources, they never lower them.
pub struct PlicModel {
    state: Mutex<PlicState>,
}

enum PlicReg {
    Priority(InterruptId),
    Pending(usize),
    Enable { context: usize, word: usize },
    Threshold(usize),
    Claim(usize),
}

impl PlicModel {
    pub fn new(num_contexts: usize) -> Self {
        Self {
            state: Mutex::new(PlicState {
                priority: [0; PLIC_NUM_SOURCES],
                pending: Bitmap::new(),
                active: Bitmap::new(),
                enable: vec![Bitmap::new(); num_contexts],
                threshold: vec![0; num_contexts],
                claimed: vec![None; num_contexts],
            }),
        }
    }

    /// Sets the pending bit of `id`, as a device asserting its line would.
    pub fn raise(&self, id: InterruptId) {
        if id != 0 && id < PLIC_NUM_SOURCES {
            self.state.lock().pending.set(id, true);
        }
    }

    pub fn snapshot(&self) -> PlicState {
        self.state.lock().clone()
    }

    fn decode(&self, offset: usize, width: AccessWidth) -> AxResult<PlicReg> {
        if width != AccessWidth::Dword || offset % 4 != 0 {
            return ax_err!(BadAddress, "plic registers take aligned 32-bit accesses");
        }
        let num_contexts = self.state.lock().threshold.len();
        let reg = match offset {
            PLIC_PRIORITY_OFFSET..PLIC_PENDING_OFFSET => PlicReg::Priority(offset / 4),
            PLIC_PENDING_OFFSET..PLIC_ENABLE_OFFSET => {
                PlicReg::Pending((offset - PLIC_PENDING_OFFSET) / 4)
            }
            PLIC_ENABLE_OFFSET..PLIC_CONTEXT_CTRL_OFFSET => {
                let rel = offset - PLIC_ENABLE_OFFSET;
                PlicReg::Enable {
                    context: rel / PLIC_ENABLE_STRIDE,
                    word: (rel % PLIC_ENABLE_STRIDE) / 4,
                }
            }
            _ => {
                let rel = offset - PLIC_CONTEXT_CTRL_OFFSET;
                match rel % PLIC_CONTEXT_STRIDE {
                    PLIC_CONTEXT_THRESHOLD_OFFSET => PlicReg::Threshold(rel / PLIC_CONTEXT_STRIDE),
                    PLIC_CONTEXT_CLAIM_COMPLETE_OFFSET => PlicReg::Claim(rel / PLIC_CONTEXT_STRIDE),
                    _ => return ax_err!(BadAddress, "reserved plic context register"),
                }
            }
        };
        match reg {
            PlicReg::Enable { context, .. } | PlicReg::Threshold(context) | PlicReg::Claim(context)
                if context >= num_contexts =>
            {
                ax_err!(BadAddress, "plic context out of range")
            }
            reg => Ok(reg),
        }
    }
}

/// Pending words backed by a source.
const PLIC_PENDING_WORDS: usize = PLIC_NUM_SOURCES / 32;

impl PlicState {
    fn word_of(bits: &Bitmap<PLIC_NUM_SOURCES>, word: usize) -> u32 {
        (0..32)
            .filter(|bit| bits.get(word * 32 + bit))
            .fold(0, |val, bit| val | (1 << bit))
    }

    fn set_word(bits: &mut Bitmap<PLIC_NUM_SOURCES>, word: usize, val: u32) {
        for bit in 0..32 {
            bits.set(word * 32 + bit, val & (1 << bit) != 0);
        }
    }

    /// Highest priority source of `context` above its threshold; the lowest
    /// id wins a tie.
    fn arbitrate(&self, context: usize) -> Option<InterruptId> {
        let mut best: Option<(u32, InterruptId)> = None;
        for id in &self.pending {
            if id == 0 || self.active.get(id) || !self.enable[context].get(id) {
                continue;
            }
            let priority = self.priority[id];
            if priority <= self.threshold[context] {
                continue;
            }
            if best.map_or(true, |(top, _)| priority > top) {
                best = Some((priority, id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn claim(&mut self, context: usize) -> InterruptId {
        if let Some(id) = self.claimed[context] {
            return id;
        }
        match self.arbitrate(context) {
            Some(id) => {
                self.pending.set(id, false);
                self.active.set(id, true);
                self.claimed[context] = Some(id);
                id
            }
            None => 0,
        }
    }

    fn complete(&mut self, context: usize, id: InterruptId) {
        if self.claimed[context] == Some(id) {
            self.claimed[context] = None;
            self.active.set(id, false);
        }
    }
}

impl RegisterBank for PlicModel {
    fn read(&self, offset: usize, width: AccessWidth) -> AxResult<usize> {
        let reg = self.decode(offset, width)?;
        let mut state = self.state.lock();
        let val = match reg {
            PlicReg::Priority(id) => state.priority[id],
            PlicReg::Pending(word) if word < PLIC_PENDING_WORDS => {
                PlicState::word_of(&state.pending, word)
            }
            PlicReg::Pending(_) => 0,
            PlicReg::Enable { context, word } => PlicState::word_of(&state.enable[context], word),
            PlicReg::Threshold(context) => state.threshold[context],
            PlicReg::Claim(context) => state.claim(context) as u32,
        };
        Ok(val as usize)
    }

    fn write(&self, offset: usize, width: AccessWidth, val: usize) -> AxResult {
        let reg = self.decode(offset, width)?;
        let val = val as u32;
        let mut state = self.state.lock();
        match reg {
            // Source 0 does not exist.
            PlicReg::Priority(0) => {}
            PlicReg::Priority(id) => state.priority[id] = val,
            PlicReg::Pending(word) if word >= PLIC_PENDING_WORDS => {}
            PlicReg::Pending(word) => {
                for bit in 0..32 {
                    if val & (1 << bit) != 0 && word * 32 + bit != 0 {
                        state.pending.set(word * 32 + bit, true);
                    }
                }
            }
            PlicReg::Enable { context, word } => {
                PlicState::set_word(&mut state.enable[context], word, val)
            }
            PlicReg::Threshold(context) => state.threshold[context] = val,
            PlicReg::Claim(context) => state.complete(context, val as InterruptId),
        }
        Ok(())
    }
}

/// A bus error unit register block with fault injection.
pub struct BusErrorModel {
    regs: ShadowBank,
}

impl BusErrorModel {
    pub fn new() -> Self {
        Self {
            regs: ShadowBank::new(0x1000),
        }
    }

    fn events(&self, offset: usize) -> u32 {
        self.regs.read32(offset).unwrap_or(0)
    }

    /// Reports `events` at `address`. Categories outside the enable register
    /// are dropped; the rest are latched into the cause, value and accrued
    /// registers. Returns whether the platform and the local interrupt fire.
    pub fn inject(&self, events: BusErrorEvents, address: u64) -> (bool, bool) {
        let latched = events.bits() & self.events(BEU_ENABLE_OFFSET);
        if latched == 0 {
            return (false, false);
        }
        let accrued = self.events(BEU_ACCRUED_OFFSET) | latched;
        let stores = [
            (BEU_CAUSE_OFFSET, latched.trailing_zeros()),
            (BEU_VALUE_OFFSET, address as u32),
            (BEU_VALUE_OFFSET + 4, (address >> 32) as u32),
            (BEU_ACCRUED_OFFSET, accrued),
        ];
        for (offset, val) in stores {
            // In bounds of the block allocated in `new`.
            let _ = self.regs.write32(offset, val);
        }
        (
            latched & self.events(BEU_PLATFORM_INTERRUPT_OFFSET) != 0,
            latched & self.events(BEU_LOCAL_INTERRUPT_OFFSET) != 0,
        )
    }
}

impl Default for BusErrorModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank for BusErrorModel {
    fn read(&self, offset: usize, width: AccessWidth) -> AxResult<usize> {
        self.regs.read(offset, width)
    }

    fn write(&self, offset: usize, width: AccessWidth, val: usize) -> AxResult {
        self.regs.write(offset, width, val)
    }
}

fn leak_slice<T>(items: Vec<T>) -> &'static [T] {
    Box::leak(items.into_boxed_slice())
}

/// A whole [`Platform`] over shadow models, built from a device table.
///
/// All parts are leaked, so the board lives for the rest of the process.
/// Every controller that needs the executing hart reads it from `csrs[0]`;
/// switch harts with [`ShadowCsrs::set_hart_id`].
pub struct SimBoard {
    pub platform: Platform<'static>,
    /// CSR file of each hart.
    pub csrs: &'static [ShadowCsrs],
    pub clint_banks: Vec<&'static ShadowBank>,
    pub plic_models: Vec<&'static PlicModel>,
    pub beu_models: Vec<&'static BusErrorModel>,
}

impl SimBoard {
    pub fn new(table: &'static DeviceTable) -> AxResult<Self> {
        if table.num_harts == 0 || table.num_harts > MAX_HARTS {
            return ax_err!(InvalidInput, "board hart count out of range");
        }
        let csrs = leak_slice((0..table.num_harts).map(ShadowCsrs::new).collect());
        let current: &'static ShadowCsrs = &csrs[0];
        let cpus: &'static [CpuLocal<'static>] = leak_slice(
            csrs.iter()
                .enumerate()
                .map(|(hart, csrs)| CpuLocal::new(hart, csrs))
                .collect(),
        );

        let mut clint_banks = Vec::new();
        let mut clints = Vec::new();
        for record in table.records_of(ControllerKind::Clint) {
            let bank: &'static ShadowBank = Box::leak(Box::new(ShadowBank::new(record.size)));
            clint_banks.push(bank);
            clints.push(Clint::new(record.id.instance, bank, current, cpus));
        }
        let clints = leak_slice(clints);

        let num_contexts = table.plic_contexts.iter().max().map_or(0, |max| max + 1);
        let mut plic_models = Vec::new();
        let mut plics = Vec::new();
        for record in table.records_of(ControllerKind::Plic) {
            let model: &'static PlicModel = Box::leak(Box::new(PlicModel::new(num_contexts)));
            plic_models.push(model);
            plics.push(Plic::new(record, table.plic_contexts, model, current, cpus));
        }
        let plics: &'static [Plic<'static>] = leak_slice(plics);

        let resolve = |id: ControllerId| -> Option<Controller<'static>> {
            match id.kind {
                ControllerKind::CpuLocal => cpus.get(id.instance).map(Controller::CpuLocal),
                ControllerKind::Plic => plics
                    .iter()
                    .find(|plic| plic.id() == id)
                    .map(Controller::Plic),
                _ => None,
            }
        };
        let mut expanders = Vec::new();
        for kind in [ControllerKind::LocalExpander, ControllerKind::GlobalExpander] {
            for record in table.records_of(kind) {
                let Some(Wiring::Contiguous { parent, first }) = record.wiring else {
                    return ax_err!(InvalidInput, "expander without a contiguous parent run");
                };
                let Some(parent) = resolve(parent) else {
                    return ax_err!(InvalidInput, "expander parent missing from the board");
                };
                expanders.push(Expander::new(record.id, parent, first, record.num_interrupts)?);
            }
        }
        let expanders = leak_slice(expanders);

        let mut beu_models = Vec::new();
        let mut bus_errors = Vec::new();
        for record in table.bus_errors {
            let Some(cpu) = cpus.get(record.hart) else {
                return ax_err!(InvalidInput, "bus error unit wired to a missing hart");
            };
            let model: &'static BusErrorModel = Box::leak(Box::new(BusErrorModel::new()));
            beu_models.push(model);
            bus_errors.push(BusErrorUnit::new(record, model, cpu, plics.first()));
        }
        let bus_errors = leak_slice(bus_errors);

        Ok(Self {
            platform: Platform::new(table, cpus, clints, plics, expanders, bus_errors),
            csrs,
            clint_banks,
            plic_models,
            beu_models,
        })
    }
}
