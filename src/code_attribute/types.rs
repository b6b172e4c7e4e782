/// Value category an instruction operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandType {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// `baload`/`bastore` serve both byte and boolean arrays.
    Byte,
    Char,
    Short,
    /// Only produced by `newarray`.
    Boolean,
}

impl OperandType {
    /// Long and Double take two stack entries and two local slots.
    pub fn is_wide(self) -> bool {
        matches!(self, OperandType::Long | OperandType::Double)
    }
}

/// How an int constant reached the stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PushForm {
    Iconst,
    Bipush,
    Sipush,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

/// Comparison operators, for both branch conditions and expressions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CompareOp {
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
        }
    }
}

/// `lcmp`, `fcmpl`, `fcmpg`, `dcmpl`, `dcmpg`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueCompare {
    Long,
    FloatL,
    FloatG,
    DoubleL,
    DoubleG,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// One decoded instruction. Branch targets are absolute code offsets and
/// `wide` forms are folded into their base instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum InstructionKind {
    Nop,
    AconstNull,
    Push { value: i32, form: PushForm },
    LongConst(i64),
    FloatConst(f32),
    DoubleConst(f64),
    /// `ldc`, `ldc_w` and `ldc2_w`.
    Ldc(u16),
    Load { ty: OperandType, slot: u16 },
    Store { ty: OperandType, slot: u16 },
    Iinc { slot: u16, delta: i16 },
    ArrayLoad(OperandType),
    ArrayStore(OperandType),
    Stack(StackOp),
    Arith { op: ArithOp, ty: OperandType },
    Neg(OperandType),
    Convert { from: OperandType, to: OperandType },
    CompareValues(ValueCompare),
    /// `if<cond>`: compares the int on top of the stack with zero.
    IfZero { op: CompareOp, target: u32 },
    /// `if_icmp<cond>` and `if_acmp<cond>`.
    IfCompare { op: CompareOp, reference: bool, target: u32 },
    /// `ifnull` (`null == true`) and `ifnonnull`.
    IfNull { null: bool, target: u32 },
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    /// `tableswitch` and `lookupswitch`, as sorted `(key, target)` pairs.
    Switch { default: u32, cases: Vec<(i32, u32)> },
    Return(Option<OperandType>),
    Throw,
    Field { op: FieldOp, index: u16 },
    Invoke { kind: InvokeKind, index: u16 },
    InvokeDynamic(u16),
    New(u16),
    NewArray(OperandType),
    ANewArray(u16),
    MultiANewArray { index: u16, dimensions: u8 },
    ArrayLength,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
}

impl InstructionKind {
    /// Every offset this instruction may jump to, excluding fallthrough.
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            InstructionKind::IfZero { target, .. }
            | InstructionKind::IfCompare { target, .. }
            | InstructionKind::IfNull { target, .. }
            | InstructionKind::Goto(target)
            | InstructionKind::Jsr(target) => vec![*target],
            InstructionKind::Switch { default, cases } => {
                let mut targets: Vec<u32> = cases.iter().map(|(_, t)| *t).collect();
                targets.push(*default);
                targets
            }
            _ => Vec::new(),
        }
    }

    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            InstructionKind::IfZero { .. }
                | InstructionKind::IfCompare { .. }
                | InstructionKind::IfNull { .. }
        )
    }

    /// Instructions after which execution never falls through.
    pub fn is_unconditional_transfer(&self) -> bool {
        matches!(
            self,
            InstructionKind::Goto(_)
                | InstructionKind::Switch { .. }
                | InstructionKind::Return(_)
                | InstructionKind::Throw
                | InstructionKind::Ret(_)
                | InstructionKind::Jsr(_)
        )
    }

    /// Instructions that end a basic block.
    pub fn ends_block(&self) -> bool {
        self.is_conditional_branch() || self.is_unconditional_transfer()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub length: u32,
    pub line_number: Option<u16>,
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn next_offset(&self) -> u32 {
        self.offset + self.length
    }
}

/// A row of the exception table with its caught type resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchBlock {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    /// Internal class name; `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

impl CatchBlock {
    pub fn covers(&self, offset: u32) -> bool {
        self.start_pc <= offset && offset < self.end_pc
    }

    pub fn is_finally(&self) -> bool {
        self.catch_type.is_none()
    }
}

/// A method body after decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMethod {
    pub instructions: Vec<Instruction>,
    pub catch_blocks: Vec<CatchBlock>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
}

impl DecodedMethod {
    pub fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |i| i.offset)
            .ok()
            .map(|idx| &self.instructions[idx])
    }
}
