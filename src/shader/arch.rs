//! Per-architecture execution latency and repeat rate tables.
//!
//! Tables are indexed by opcode encoding.  A zero entry marks an opcode the architecture does not
//! implement (e.g. the dot products on the scalar architectures).

use phf::phf_map;

use crate::error::{ShaderError, ShaderResult};
use crate::shader::isa::{ShaderOpcode, LAST_OPCODE};

#[derive(Debug)]
pub struct ArchTables {
    pub name: &'static str,
    pub latency: [u32; LAST_OPCODE],
    pub repeat_rate: [u32; LAST_OPCODE],
}

//  NOP ADD ADDI ARL ANDP -- -- COS | DP3 DP4 DPH DST EX2 EXP FLR FRC
//  LG2 LIT LOG MAD MAX MIN MOV MUL | MULI RCP -- RSQ SETPEQ SETPGT SGE SETPLT
//  SIN STPEQI SLT STPGTI STPLTI TXL TEX TXB | TXP KIL KLS ZXP ZXS CMP CMPKIL CHS
//  LDA FXMUL FXMAD FXMAD2 DDX DDY JMP END
const SIMD4_REPEAT: [u32; LAST_OPCODE] = [
    1, 1, 1, 1, 1, 0, 0, 6, 1, 1, 1, 1, 2, 4, 0, 1,
    2, 1, 4, 1, 1, 1, 1, 1, 1, 4, 0, 4, 1, 1, 1, 1,
    6, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 8, 8, 1, 1,
];

const SCALAR_REPEAT: [u32; LAST_OPCODE] = [
    1, 1, 1, 1, 1, 0, 0, 6, 0, 0, 0, 8, 2, 4, 0, 1,
    2, 7, 4, 1, 1, 1, 1, 1, 1, 4, 0, 4, 1, 1, 1, 1,
    6, 1, 1, 1, 1, 4, 3, 4, 4, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 8, 8, 1, 1,
];

const FIXED_LATENCY: [u32; LAST_OPCODE] = [
    3, 3, 3, 3, 3, 0, 0, 12, 3, 3, 3, 3, 3, 3, 0, 3,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 0, 3, 3, 3, 3, 3,
    12, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 16, 16, 3, 3,
];

pub static SIMD4_VAR_LAT: ArchTables = ArchTables {
    name: "SIMD4VarLat",
    latency: [
        1, 3, 2, 3, 1, 0, 0, 12, 3, 3, 3, 4, 5, 9, 0, 3,
        5, 4, 9, 3, 3, 3, 3, 3, 2, 5, 0, 5, 3, 3, 3, 3,
        12, 2, 3, 2, 2, 1, 1, 1, 5, 3, 3, 3, 3, 3, 3, 3,
        1, 3, 3, 3, 16, 16, 1, 1,
    ],
    repeat_rate: SIMD4_REPEAT,
};

pub static SCALAR_VAR_LAT: ArchTables = ArchTables {
    name: "ScalarVarLat",
    latency: [
        1, 3, 2, 3, 1, 0, 0, 12, 0, 0, 0, 4, 5, 9, 0, 3,
        5, 4, 9, 3, 3, 3, 3, 3, 2, 5, 0, 5, 3, 3, 3, 3,
        12, 2, 3, 2, 2, 4, 3, 4, 7, 3, 3, 3, 3, 3, 3, 3,
        1, 3, 3, 3, 16, 16, 1, 1,
    ],
    repeat_rate: SCALAR_REPEAT,
};

pub static SIMD4_FIX_LAT: ArchTables = ArchTables {
    name: "SIMD4FixLat",
    latency: FIXED_LATENCY,
    repeat_rate: SIMD4_REPEAT,
};

pub static SCALAR_FIX_LAT: ArchTables = ArchTables {
    name: "ScalarFixLat",
    latency: FIXED_LATENCY,
    repeat_rate: SCALAR_REPEAT,
};

static ARCHITECTURES: phf::Map<&'static str, &'static ArchTables> = phf_map! {
    "SIMD4VarLat" => &SIMD4_VAR_LAT,
    "ScalarVarLat" => &SCALAR_VAR_LAT,
    "SIMD4FixLat" => &SIMD4_FIX_LAT,
    "ScalarFixLat" => &SCALAR_FIX_LAT,
};

/// Handle on the selected architecture.  Cheap to copy; each engine owns one.
#[derive(Debug, Clone, Copy)]
pub struct ArchParams {
    tables: &'static ArchTables,
}

impl ArchParams {
    pub fn select(name: &str) -> ShaderResult<Self> {
        ARCHITECTURES
            .get(name)
            .map(|tables| ArchParams { tables })
            .ok_or_else(|| {
                ShaderError::Config(format!(
                    "unknown shader architecture '{name}' (expected one of {})",
                    Self::names().join(" ")
                ))
            })
    }

    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<_> = ARCHITECTURES.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn name(&self) -> &'static str {
        self.tables.name
    }

    /// Execution latency of `opcode`, not counting the writeback cycle.
    pub fn execution_latency(&self, opcode: ShaderOpcode) -> ShaderResult<u32> {
        self.lookup(&self.tables.latency, opcode)
    }

    pub fn repeat_rate(&self, opcode: ShaderOpcode) -> ShaderResult<u32> {
        self.lookup(&self.tables.repeat_rate, opcode)
    }

    fn lookup(&self, table: &[u32; LAST_OPCODE], opcode: ShaderOpcode) -> ShaderResult<u32> {
        match table[opcode.index()] {
            0 => Err(ShaderError::UnimplementedOpcode {
                arch: self.tables.name,
                opcode,
            }),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArchParams;
    use crate::error::ShaderError;
    use crate::shader::isa::ShaderOpcode;

    #[test]
    fn variable_latency_lookup() {
        let arch = ArchParams::select("SIMD4VarLat").unwrap();
        assert_eq!(3, arch.execution_latency(ShaderOpcode::Add).unwrap());
        assert_eq!(2, arch.execution_latency(ShaderOpcode::Addi).unwrap());
        assert_eq!(12, arch.execution_latency(ShaderOpcode::Cos).unwrap());
        assert_eq!(6, arch.repeat_rate(ShaderOpcode::Sin).unwrap());
        assert_eq!(16, arch.execution_latency(ShaderOpcode::Ddy).unwrap());
    }

    #[test]
    fn unimplemented_opcodes_are_errors() {
        let simd = ArchParams::select("SIMD4FixLat").unwrap();
        assert!(matches!(
            simd.execution_latency(ShaderOpcode::Flr),
            Err(ShaderError::UnimplementedOpcode { .. })
        ));
        let scalar = ArchParams::select("ScalarVarLat").unwrap();
        assert!(scalar.execution_latency(ShaderOpcode::Dp4).is_err());
        assert_eq!(7, scalar.execution_latency(ShaderOpcode::Txp).unwrap());
        assert_eq!(7, scalar.repeat_rate(ShaderOpcode::Lit).unwrap());
    }

    #[test]
    fn unknown_architecture() {
        let err = ArchParams::select("VLIW").expect_err("not an architecture");
        assert!(matches!(err, ShaderError::Config(_)));
        assert_eq!(4, ArchParams::names().len());
    }
}
