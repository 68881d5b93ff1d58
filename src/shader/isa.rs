use std::fmt;
use std::str::FromStr;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use phf::phf_map;

use crate::error::ShaderError;

/// Number of opcode encodings, including the unassigned ones.
pub const LAST_OPCODE: usize = 0x38;

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderOpcode {
    Nop    = 0x00,
    Add    = 0x01,
    Addi   = 0x02,
    Arl    = 0x03,
    Andp   = 0x04,
    Cos    = 0x07,
    Dp3    = 0x08,
    Dp4    = 0x09,
    Dph    = 0x0a,
    Dst    = 0x0b,
    Ex2    = 0x0c,
    Exp    = 0x0d,
    Flr    = 0x0e,
    Frc    = 0x0f,
    Lg2    = 0x10,
    Lit    = 0x11,
    Log    = 0x12,
    Mad    = 0x13,
    Max    = 0x14,
    Min    = 0x15,
    Mov    = 0x16,
    Mul    = 0x17,
    Muli   = 0x18,
    Rcp    = 0x19,
    Rsq    = 0x1b,
    Setpeq = 0x1c,
    Setpgt = 0x1d,
    Sge    = 0x1e,
    Setplt = 0x1f,
    Sin    = 0x20,
    Stpeqi = 0x21,
    Slt    = 0x22,
    Stpgti = 0x23,
    Stplti = 0x24,
    Txl    = 0x25,
    Tex    = 0x26,
    Txb    = 0x27,
    Txp    = 0x28,
    Kil    = 0x29,
    Kls    = 0x2a,
    Zxp    = 0x2b,
    Zxs    = 0x2c,
    Cmp    = 0x2d,
    Cmpkil = 0x2e,
    Chs    = 0x2f,
    Lda    = 0x30,
    Fxmul  = 0x31,
    Fxmad  = 0x32,
    Fxmad2 = 0x33,
    Ddx    = 0x34,
    Ddy    = 0x35,
    Jmp    = 0x36,
    End    = 0x37,
}

static MNEMONICS: phf::Map<&'static str, ShaderOpcode> = phf_map! {
    "nop"    => ShaderOpcode::Nop,
    "add"    => ShaderOpcode::Add,
    "addi"   => ShaderOpcode::Addi,
    "arl"    => ShaderOpcode::Arl,
    "andp"   => ShaderOpcode::Andp,
    "cos"    => ShaderOpcode::Cos,
    "dp3"    => ShaderOpcode::Dp3,
    "dp4"    => ShaderOpcode::Dp4,
    "dph"    => ShaderOpcode::Dph,
    "dst"    => ShaderOpcode::Dst,
    "ex2"    => ShaderOpcode::Ex2,
    "exp"    => ShaderOpcode::Exp,
    "flr"    => ShaderOpcode::Flr,
    "frc"    => ShaderOpcode::Frc,
    "lg2"    => ShaderOpcode::Lg2,
    "lit"    => ShaderOpcode::Lit,
    "log"    => ShaderOpcode::Log,
    "mad"    => ShaderOpcode::Mad,
    "max"    => ShaderOpcode::Max,
    "min"    => ShaderOpcode::Min,
    "mov"    => ShaderOpcode::Mov,
    "mul"    => ShaderOpcode::Mul,
    "muli"   => ShaderOpcode::Muli,
    "rcp"    => ShaderOpcode::Rcp,
    "rsq"    => ShaderOpcode::Rsq,
    "setpeq" => ShaderOpcode::Setpeq,
    "setpgt" => ShaderOpcode::Setpgt,
    "sge"    => ShaderOpcode::Sge,
    "setplt" => ShaderOpcode::Setplt,
    "sin"    => ShaderOpcode::Sin,
    "stpeqi" => ShaderOpcode::Stpeqi,
    "slt"    => ShaderOpcode::Slt,
    "stpgti" => ShaderOpcode::Stpgti,
    "stplti" => ShaderOpcode::Stplti,
    "txl"    => ShaderOpcode::Txl,
    "tex"    => ShaderOpcode::Tex,
    "txb"    => ShaderOpcode::Txb,
    "txp"    => ShaderOpcode::Txp,
    "kil"    => ShaderOpcode::Kil,
    "kls"    => ShaderOpcode::Kls,
    "zxp"    => ShaderOpcode::Zxp,
    "zxs"    => ShaderOpcode::Zxs,
    "cmp"    => ShaderOpcode::Cmp,
    "cmpkil" => ShaderOpcode::Cmpkil,
    "chs"    => ShaderOpcode::Chs,
    "lda"    => ShaderOpcode::Lda,
    "fxmul"  => ShaderOpcode::Fxmul,
    "fxmad"  => ShaderOpcode::Fxmad,
    "fxmad2" => ShaderOpcode::Fxmad2,
    "ddx"    => ShaderOpcode::Ddx,
    "ddy"    => ShaderOpcode::Ddy,
    "jmp"    => ShaderOpcode::Jmp,
    "end"    => ShaderOpcode::End,
};

impl ShaderOpcode {
    pub fn from_encoding(encoding: u8) -> Option<Self> {
        Self::from_u8(encoding)
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        MNEMONICS.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        MNEMONICS
            .entries()
            .find(|(_, op)| **op == self)
            .map(|(name, _)| *name)
            .unwrap_or("???")
    }

    pub fn index(self) -> usize {
        self as u8 as usize
    }

    pub fn num_operands(self) -> usize {
        use ShaderOpcode::*;
        match self {
            Nop | End | Chs => 0,
            Arl | Cos | Ex2 | Exp | Flr | Frc | Lg2 | Lit | Log | Mov | Rcp | Rsq | Sin | Kil
            | Zxp | Ddx | Ddy | Jmp => 1,
            Mad | Cmp | Cmpkil | Fxmad | Fxmad2 => 3,
            _ => 2,
        }
    }

    pub fn has_result(self) -> bool {
        use ShaderOpcode::*;
        !matches!(self, End | Nop | Kil | Kls | Zxp | Zxs | Chs | Jmp)
    }

    pub fn is_texture_load(self) -> bool {
        use ShaderOpcode::*;
        matches!(self, Tex | Txb | Txp | Txl | Lda)
    }

    pub fn is_zexport(self) -> bool {
        matches!(self, ShaderOpcode::Zxp | ShaderOpcode::Zxs)
    }

    pub fn is_jump(self) -> bool {
        self == ShaderOpcode::Jmp
    }

    pub fn is_end(self) -> bool {
        self == ShaderOpcode::End
    }

    fn always_scalar(self) -> bool {
        use ShaderOpcode::*;
        matches!(self, Setpeq | Setpgt | Setplt | Andp | Stpeqi | Stpgti | Stplti | Jmp)
    }

    // Vector ops that issue on the scalar ALU when they only write one component.
    fn maskable(self) -> bool {
        use ShaderOpcode::*;
        matches!(
            self,
            Add | Arl | Cmp | Cmpkil | Ex2 | Frc | Lg2 | Mad | Max | Min | Mov | Mul | Sge | Slt
                | Rcp | Rsq | Fxmul | Fxmad | Fxmad2 | Cos | Sin | Ddx | Ddy | Addi | Muli
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Input,
    Output,
    Param,
    Temp,
    Addr,
    Pred,
    Texture,
    Immediate,
}

impl Bank {
    fn prefix(self) -> &'static str {
        match self {
            Bank::Input => "i",
            Bank::Output => "o",
            Bank::Param => "c",
            Bank::Temp => "r",
            Bank::Addr => "a",
            Bank::Pred => "p",
            Bank::Texture => "t",
            Bank::Immediate => "#",
        }
    }

    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'i' => Some(Bank::Input),
            'o' => Some(Bank::Output),
            'c' => Some(Bank::Param),
            'r' => Some(Bank::Temp),
            'a' => Some(Bank::Addr),
            'p' => Some(Bank::Pred),
            't' => Some(Bank::Texture),
            '#' => Some(Bank::Immediate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub bank: Bank,
    pub reg: u32,
}

impl Operand {
    pub const fn new(bank: Bank, reg: u32) -> Self {
        Self { bank, reg }
    }
}

impl Default for Operand {
    fn default() -> Self {
        Self::new(Bank::Input, 0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bank.prefix(), self.reg)
    }
}

/// Result write mask, bit 0 = x .. bit 3 = w.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMask(pub u8);

impl WriteMask {
    pub const XYZW: WriteMask = WriteMask(0b1111);

    pub fn components(self) -> u32 {
        (self.0 & 0b1111).count_ones()
    }

    fn parse(text: &str) -> Option<Self> {
        let mut bits = 0u8;
        for c in text.chars() {
            let bit = match c {
                'x' => 0,
                'y' => 1,
                'z' => 2,
                'w' => 3,
                _ => return None,
            };
            bits |= 1 << bit;
        }
        (bits != 0).then_some(WriteMask(bits))
    }
}

impl Default for WriteMask {
    fn default() -> Self {
        Self::XYZW
    }
}

impl fmt::Display for WriteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, c) in ['x', 'y', 'z', 'w'].iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// A decoded shader instruction. Immutable once built; dynamic instructions share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInstr {
    pub opcode: ShaderOpcode,
    pub operands: [Operand; 3],
    pub result: Operand,
    pub mask: WriteMask,
    /// Address register used for relative addressing of the constant bank.
    pub relative: Option<u32>,
    pub jump_target: u32,
    pub wait_point: bool,
}

impl ShaderInstr {
    pub fn new(opcode: ShaderOpcode) -> Self {
        Self {
            opcode,
            operands: [Operand::default(); 3],
            result: Operand::new(Bank::Temp, 0),
            mask: WriteMask::XYZW,
            relative: None,
            jump_target: 0,
            wait_point: false,
        }
    }

    pub fn with_result(mut self, bank: Bank, reg: u32) -> Self {
        self.result = Operand::new(bank, reg);
        self
    }

    pub fn with_mask(mut self, mask: WriteMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_operand(mut self, idx: usize, bank: Bank, reg: u32) -> Self {
        self.operands[idx] = Operand::new(bank, reg);
        self
    }

    pub fn num_operands(&self) -> usize {
        self.opcode.num_operands()
    }

    pub fn sources(&self) -> &[Operand] {
        &self.operands[..self.num_operands()]
    }

    pub fn has_result(&self) -> bool {
        self.opcode.has_result()
    }

    pub fn is_texture_load(&self) -> bool {
        self.opcode.is_texture_load()
    }

    pub fn is_zexport(&self) -> bool {
        self.opcode.is_zexport()
    }

    pub fn is_jump(&self) -> bool {
        self.opcode.is_jump()
    }

    pub fn is_end(&self) -> bool {
        self.opcode.is_end()
    }

    pub fn is_scalar(&self) -> bool {
        self.opcode.always_scalar() || (self.opcode.maskable() && self.mask.components() == 1)
    }

    fn fmt_source(&self, f: &mut fmt::Formatter<'_>, operand: &Operand) -> fmt::Result {
        match self.relative {
            Some(addr) if operand.bank == Bank::Param => write!(f, "c[a{}+{}]", addr, operand.reg),
            _ => write!(f, "{operand}"),
        }
    }
}

impl fmt::Display for ShaderInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wait_point {
            write!(f, "@")?;
        }
        write!(f, "{}", self.opcode.mnemonic())?;
        let mut sep = " ";
        if self.has_result() {
            write!(f, "{sep}{}", self.result)?;
            if self.mask != WriteMask::XYZW {
                write!(f, ".{}", self.mask)?;
            }
            sep = ", ";
        }
        for operand in self.sources() {
            write!(f, "{sep}")?;
            self.fmt_source(f, operand)?;
            sep = ", ";
        }
        if self.is_jump() {
            write!(f, "{sep}{}", self.jump_target)?;
        }
        Ok(())
    }
}

fn parse_register(text: &str) -> Result<(Operand, Option<u32>), String> {
    let text = text.trim();
    // c[aN+M]
    if let Some(inner) = text.strip_prefix("c[").and_then(|rest| rest.strip_suffix(']')) {
        let (addr, offset) = inner
            .split_once('+')
            .ok_or_else(|| format!("malformed relative operand '{text}'"))?;
        let addr = addr
            .trim()
            .strip_prefix('a')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| format!("bad address register in '{text}'"))?;
        let offset = offset
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("bad offset in '{text}'"))?;
        return Ok((Operand::new(Bank::Param, offset), Some(addr)));
    }
    let mut chars = text.chars();
    let bank = chars
        .next()
        .and_then(Bank::from_prefix)
        .ok_or_else(|| format!("unknown register '{text}'"))?;
    let reg = chars
        .as_str()
        .parse::<u32>()
        .map_err(|_| format!("bad register number in '{text}'"))?;
    Ok((Operand::new(bank, reg), None))
}

impl FromStr for ShaderInstr {
    type Err = String;

    /// Parses one line of shader assembly, e.g. `add r3.x, r1, c[a0+4]` or `@jmp p0, 12`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut line = line.trim();
        let wait_point = line.starts_with('@');
        if wait_point {
            line = line[1..].trim_start();
        }
        let (mnemonic, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let opcode = ShaderOpcode::from_mnemonic(mnemonic)
            .ok_or_else(|| format!("unknown mnemonic '{mnemonic}'"))?;

        let mut instr = ShaderInstr::new(opcode);
        instr.wait_point = wait_point;
        let mut fields: Vec<&str> = rest
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();

        let expected = usize::from(opcode.has_result())
            + opcode.num_operands()
            + usize::from(opcode.is_jump());
        if fields.len() != expected {
            return Err(format!(
                "'{mnemonic}' takes {expected} fields, found {}",
                fields.len()
            ));
        }

        if opcode.is_jump() {
            let target = fields.pop().unwrap_or_default();
            instr.jump_target = target
                .parse::<u32>()
                .map_err(|_| format!("bad jump target '{target}'"))?;
        }

        let mut fields = fields.into_iter();
        if opcode.has_result() {
            let dst = fields.next().unwrap_or_default();
            let (reg, mask) = dst.split_once('.').unwrap_or((dst, ""));
            let (operand, relative) = parse_register(reg)?;
            if relative.is_some() {
                return Err(format!("relative addressing not allowed on result '{dst}'"));
            }
            instr.result = operand;
            if !mask.is_empty() {
                instr.mask =
                    WriteMask::parse(mask).ok_or_else(|| format!("bad write mask '{mask}'"))?;
            }
        }
        for (idx, src) in fields.enumerate() {
            // source swizzles are accepted and ignored
            let reg = src.split_once('.').map_or(src, |(reg, _)| reg);
            let (operand, relative) = parse_register(reg)?;
            if let Some(addr) = relative {
                if instr.relative.is_some_and(|a| a != addr) {
                    return Err("only one address register per instruction".to_string());
                }
                instr.relative = Some(addr);
            }
            instr.operands[idx] = operand;
        }
        Ok(instr)
    }
}

/// Assembles a program, one instruction per line. `;` starts a comment.
pub fn assemble(text: &str) -> Result<Vec<ShaderInstr>, ShaderError> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let code = raw.split(';').next().unwrap_or("").trim();
            (!code.is_empty()).then_some((idx + 1, code))
        })
        .map(|(line, code)| {
            code.parse::<ShaderInstr>()
                .map_err(|message| ShaderError::Assembly { line, message })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holes_in_encoding_space() {
        assert_eq!(Some(ShaderOpcode::Cos), ShaderOpcode::from_encoding(0x07));
        assert_eq!(None, ShaderOpcode::from_encoding(0x05));
        assert_eq!(None, ShaderOpcode::from_encoding(0x1a));
        assert_eq!(None, ShaderOpcode::from_encoding(LAST_OPCODE as u8));
        assert_eq!(0x37, ShaderOpcode::End.index());
    }

    #[test]
    fn scalar_classification() {
        let add = ShaderInstr::new(ShaderOpcode::Add);
        assert!(!add.is_scalar());
        assert!(add.clone().with_mask(WriteMask(0b0100)).is_scalar());
        assert!(!add.with_mask(WriteMask(0b0011)).is_scalar());
        assert!(ShaderInstr::new(ShaderOpcode::Setpgt).is_scalar());
        assert!(ShaderInstr::new(ShaderOpcode::Jmp).is_scalar());
        assert!(!ShaderInstr::new(ShaderOpcode::Dp4).with_mask(WriteMask(1)).is_scalar());
        assert!(!ShaderInstr::new(ShaderOpcode::Nop).is_scalar());
    }

    #[test]
    fn parses_relative_and_mask() {
        let instr: ShaderInstr = "mad r2.w, r0, c[a1+8], i3".parse().unwrap();
        assert_eq!(ShaderOpcode::Mad, instr.opcode);
        assert_eq!(Operand::new(Bank::Temp, 2), instr.result);
        assert_eq!(WriteMask(0b1000), instr.mask);
        assert_eq!(Some(1), instr.relative);
        assert_eq!(Operand::new(Bank::Param, 8), instr.operands[1]);
        assert_eq!("mad r2.w, r0, c[a1+8], i3", instr.to_string());
    }

    #[test]
    fn parses_jump_and_wait_point() {
        let instr: ShaderInstr = "@jmp p1, 12".parse().unwrap();
        assert!(instr.is_jump());
        assert!(instr.wait_point);
        assert!(!instr.has_result());
        assert_eq!(12, instr.jump_target);
        assert_eq!(Operand::new(Bank::Pred, 1), instr.operands[0]);
    }

    #[test]
    fn assemble_reports_line() {
        let err = assemble("mov r0, i0\n; comment\nfoo r1\n").expect_err("unknown mnemonic");
        assert!(matches!(err, ShaderError::Assembly { line: 3, .. }));
        let prog = assemble("tex r1, i0, t0\nend ; done\n").unwrap();
        assert_eq!(2, prog.len());
        assert!(prog[0].is_texture_load());
        assert!(prog[1].is_end());
    }
}
