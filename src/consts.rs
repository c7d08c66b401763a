// PLIC layout strictly follows the PLIC 1.0.0 memory map as provided in riscv-plic-1.0.0.

/// Number of interrupt sources addressable by the PLIC 1.0.0 memory map.
/// Source IDs range from 1 to 1023 (inclusive). Source 0 is reserved and does not exist.
pub const PLIC_NUM_SOURCES: usize = 1024; // includes source 0 for indexing convenience

/// Capacity of the PLIC handler table. A board may wire fewer sources.
pub const PLIC_MAX_SOURCES: usize = 256;

/// Priority given to a source whose handler is registered while its priority is 0.
pub const PLIC_DEFAULT_PRIORITY: u32 = 1;

// --- PLIC register offsets (relative to PLIC_BASE) ---

/// Offset to priority register for interrupt source 0 (reserved).
/// Priority for source N is at: PLIC_PRIORITY_OFFSET + N * 4
pub const PLIC_PRIORITY_OFFSET: usize = 0x000000;

/// Offset to the first pending register word (bits 0–31).
/// Word index W covers sources [W*32, W*32+31].
pub const PLIC_PENDING_OFFSET: usize = 0x001000;

/// Offset to the enable bits for context 0.
/// For context C, enable region starts at: PLIC_ENABLE_OFFSET + C * PLIC_ENABLE_STRIDE
pub const PLIC_ENABLE_OFFSET: usize = 0x002000;

/// Stride between contexts in the enable region (in bytes).
/// Each context uses 32 words = 128 bytes = 0x80.
pub const PLIC_ENABLE_STRIDE: usize = 0x80;

/// Offset to the control registers (threshold & claim/complete) for context 0.
/// For context C, control region starts at: PLIC_CONTEXT_CTRL_OFFSET + C * PLIC_CONTEXT_STRIDE
pub const PLIC_CONTEXT_CTRL_OFFSET: usize = 0x200000;

/// Stride between contexts in the control region (in bytes).
/// Each context uses two 32-bit registers (8 bytes), but spaced by 0x1000.
pub const PLIC_CONTEXT_STRIDE: usize = 0x1000;

/// Offset within a context's control region to the priority threshold register.
pub const PLIC_CONTEXT_THRESHOLD_OFFSET: usize = 0x00;

/// Offset within a context's control region to the claim/complete register.
pub const PLIC_CONTEXT_CLAIM_COMPLETE_OFFSET: usize = 0x04;

// --- CLINT register offsets (relative to CLINT_BASE) ---

/// Machine software interrupt pending word of hart N: CLINT_MSIP_OFFSET + N * 4
pub const CLINT_MSIP_OFFSET: usize = 0x0000;

/// Timer compare register of hart N: CLINT_MTIMECMP_OFFSET + N * 8
pub const CLINT_MTIMECMP_OFFSET: usize = 0x4000;

/// Free running 64-bit time counter shared by all harts.
pub const CLINT_MTIME_OFFSET: usize = 0xBFF8;

// --- Bus error unit register offsets ---

pub const BEU_CAUSE_OFFSET: usize = 0x00;
pub const BEU_VALUE_OFFSET: usize = 0x08;
pub const BEU_ENABLE_OFFSET: usize = 0x10;
pub const BEU_PLATFORM_INTERRUPT_OFFSET: usize = 0x18;
pub const BEU_ACCRUED_OFFSET: usize = 0x20;
pub const BEU_LOCAL_INTERRUPT_OFFSET: usize = 0x28;

// --- CPU local interrupt ids (mcause codes) ---

/// Machine software interrupt.
pub const INTERRUPT_ID_SW: usize = 3;
/// Machine timer interrupt.
pub const INTERRUPT_ID_TMR: usize = 7;
/// Machine external interrupt, driven by the PLIC.
pub const INTERRUPT_ID_EXT: usize = 11;
/// First custom local interrupt line.
pub const INTERRUPT_ID_LC0: usize = 16;
/// Last custom local interrupt line.
pub const INTERRUPT_ID_LC15: usize = 31;
/// First id past the local lines; global lines start here.
pub const INTERRUPT_ID_GL0: usize = 32;
/// Local interrupt raised by the bus error unit.
pub const INTERRUPT_ID_BEU: usize = 128;

/// Number of ids a CPU local controller decodes from `mie`/`mip`.
pub const LOCAL_INTERRUPTS: usize = 32;
/// Local handler slots: the 32 cause codes plus one for the bus error unit.
pub const LOCAL_TABLE_SIZE: usize = LOCAL_INTERRUPTS + 1;
/// Slot holding the bus error unit registration.
pub const LOCAL_BEU_SLOT: usize = LOCAL_INTERRUPTS;

// --- Expanders ---

pub const LOCAL_EXPANDER_LINES: usize = 16;
pub const GLOBAL_EXPANDER_LINES: usize = 127;
pub const EXPANDER_MAX_LINES: usize = GLOBAL_EXPANDER_LINES;

// --- Harts and exceptions ---

/// Width of a hart affinity mask.
pub const MAX_HARTS: usize = 32;

/// Machine exception codes below this value can carry a handler.
pub const MAX_EXCEPTION_CODE: usize = 12;

// --- CSR fields ---

/// `mstatus.MIE`, the global machine interrupt enable.
pub const MSTATUS_MIE: usize = 1 << 3;
/// Low two bits of `mtvec` select the trap vector mode.
pub const MTVEC_MODE_MASK: usize = 0b11;
/// Distance between entries of a vectored trap table.
pub const MTVEC_VECTOR_STRIDE: usize = 4;
/// `mcause` interrupt flag.
pub const MCAUSE_INTERRUPT: usize = 1 << (usize::BITS - 1);
