use crate::scanner::{self, pattern, Pattern};
use crate::{resolvers, Arch};

/// Instruction idiom used by the runtime's module initialisation to load the address of its
/// module data, along with where in the idiom the address operand lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// RIP relative `lea`. The displacement is relative to the instruction following it.
    X64 {
        pattern: Pattern,
        /// offset of the 32-bit little endian displacement
        disp_offset: usize,
        /// offset of the instruction following the `lea`
        next_insn_offset: usize,
    },
    /// `lea` of an absolute address, confirmed by a loop idiom shortly after it.
    X86 {
        pattern: Pattern,
        /// offset of the 32-bit little endian absolute address
        ptr_offset: usize,
        loop_pattern: Pattern,
        /// exclusive upper bound on the distance from the start of `pattern` to the start of
        /// `loop_pattern`
        loop_max_distance: usize,
    },
    /// `lis` + `addi` pair materialising a 32-bit constant.
    PpcBe {
        pattern: Pattern,
        /// offset of the 16-bit big endian `lis` immediate (high half)
        hi_offset: usize,
        /// offset of the 16-bit big endian signed `addi` immediate (low half)
        lo_offset: usize,
    },
}

// .text:000000000044D80A 48 8D 0D 8F DA 26 00    lea     rcx, runtime_firstmoduledata
// .text:000000000044D811 EB 0D                   jmp     short loc_44D820
// .text:000000000044D813 48 8B 89 30 02 00 00    mov     rcx, [rcx+230h]
// .text:000000000044D81A 66 0F 1F 44 00 00       nop     word ptr [rax+rax+00h]
pub const X64: Signature = Signature::X64 {
    pattern: pattern!("48 8D 0? ?? ?? ?? ?? EB ?? 48 8? 8? ?? 02 00 00 66 0F 1F 44 00 00"),
    disp_offset: 3,
    next_insn_offset: 7,
};

// .text:00438A94 8D 05 60 49 6A 00                lea     eax, off_6A4960
// .text:00438A9A EB 1A                            jmp     short loc_438AB6
// ...
// .text:00438AAC 8B 80 18 01 00 00                mov     eax, [eax+118h]
// .text:00438AB2 8B 54 24 20                      mov     edx, [esp+2Ch+var_C]
// .text:00438AB6 85 C0                            test    eax, eax
// .text:00438AB8 75 E2                            jnz     short loc_438A9C
pub const X86: Signature = Signature::X86 {
    pattern: pattern!("8D ?? ?? ?? ?? ?? EB 1A"),
    ptr_offset: 2,
    loop_pattern: pattern!("8B ?? ?? ?? ?? ?? 8B ?? 24 20 85 ?? 75 E2"),
    loop_max_distance: 50,
};

// 0x61a74: 3C 80 00 2C    lis  r4, 0x2c
// 0x61a78: 38 84 80 00    addi r4, r4, -0x8000
// 0x61a7c: 48 00 00 08    b    0x61a84
// 0x61a80: E8 84 02 30    ld   r4, 0x230(r4)
// 0x61a84: 7C 24 00 00    cmpd r4, r0
// 0x61a88: 41 82 01 A8    beq  0x61c30
pub const PPC_BE: Signature = Signature::PpcBe {
    pattern: pattern!("3? 80 00 2C 3? ?? 80 00 48 ?? ?? 08 E? ?? 02 30 7C ?? 00 00 41 82 ?? ??"),
    hi_offset: 2,
    lo_offset: 6,
};

/// All signatures in the order their results are collected
pub const SIGNATURES: [Signature; 3] = [X64, X86, PPC_BE];

impl Signature {
    pub fn for_arch(arch: Arch) -> &'static Signature {
        match arch {
            Arch::X64 => &X64,
            Arch::X86 => &X86,
            Arch::PpcBe => &PPC_BE,
        }
    }
    pub const fn arch(&self) -> Arch {
        match self {
            Self::X64 { .. } => Arch::X64,
            Self::X86 { .. } => Arch::X86,
            Self::PpcBe { .. } => Arch::PpcBe,
        }
    }
    /// Pattern of the instruction carrying the module data address
    pub const fn pattern(&self) -> &Pattern {
        match self {
            Self::X64 { pattern, .. } | Self::X86 { pattern, .. } | Self::PpcBe { pattern, .. } => {
                pattern
            }
        }
    }
    /// Scan `data`, mapped at `section_base`, returning every resolved module data address in
    /// match order
    pub fn scan(&self, data: &[u8], section_base: u64) -> Vec<u64> {
        match *self {
            Self::X64 {
                pattern,
                disp_offset,
                next_insn_offset,
            } => scanner::scan(data, &pattern, |m| {
                resolvers::resolve_rip_relative(
                    data,
                    m,
                    disp_offset,
                    next_insn_offset,
                    section_base,
                )
            }),
            Self::X86 {
                pattern,
                ptr_offset,
                loop_pattern,
                loop_max_distance,
            } => scanner::scan(data, &pattern, |m| {
                resolvers::resolve_absolute_with_loop(
                    data,
                    m,
                    ptr_offset,
                    &loop_pattern,
                    loop_max_distance,
                )
            }),
            Self::PpcBe {
                pattern,
                hi_offset,
                lo_offset,
            } => scanner::scan(data, &pattern, |m| {
                resolvers::resolve_split_immediate(data, m, hi_offset, lo_offset)
            }),
        }
    }
}
