//! Stack-machine opcodes
//!
//! The opcode table for the source bytecode, plus the static classification
//! oracle the recompiler consults: does an opcode carry an immediate, is it
//! a branch, does it take a variable register list, and is it pure (safe to
//! eliminate when its result is unused).
//!
//! Encoding: one opcode byte, followed by a 16-bit little-endian immediate
//! when the opcode sits at or above [`HAVE_ARGUMENT`]. Opcodes numbered past
//! the source range are synthetic: they never appear in input bytecode and
//! exist only in recompiled output.

/// Opcodes at or above this value carry a two-byte immediate.
pub const HAVE_ARGUMENT: u8 = 90;

/// Stack-machine opcode enumeration
///
/// Discriminants match the source bytecode numbering so that raw input
/// bytes map directly onto the enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack manipulation =====
    /// Placeholder emitted for removed instructions
    StopCode = 0,
    /// Discard the top of stack
    PopTop = 1,
    /// Swap the two topmost values
    RotTwo = 2,
    /// Rotate the three topmost values
    RotThree = 3,
    /// Duplicate the top of stack
    DupTop = 4,
    /// Rotate the four topmost values
    RotFour = 5,
    /// No operation
    Nop = 9,

    // ===== Unary operations (pop 1, push 1) =====
    /// `+x`
    UnaryPositive = 10,
    /// `-x`
    UnaryNegative = 11,
    /// `not x`
    UnaryNot = 12,
    /// `` `x` `` (repr)
    UnaryConvert = 13,
    /// `~x`
    UnaryInvert = 15,

    // ===== Binary operations (pop 2, push 1) =====
    /// `x ** y`
    BinaryPower = 19,
    /// `x * y`
    BinaryMultiply = 20,
    /// `x / y` (classic division)
    BinaryDivide = 21,
    /// `x % y`
    BinaryModulo = 22,
    /// `x + y`
    BinaryAdd = 23,
    /// `x - y`
    BinarySubtract = 24,
    /// `x[y]`
    BinarySubscr = 25,
    /// `x // y`
    BinaryFloorDivide = 26,
    /// `x / y` (true division)
    BinaryTrueDivide = 27,
    /// `x //= y`
    InplaceFloorDivide = 28,
    /// `x /= y` (true division)
    InplaceTrueDivide = 29,

    // ===== Slicing =====
    /// `x[:]`
    Slice0 = 30,
    /// `x[a:]`
    Slice1 = 31,
    /// `x[:b]`
    Slice2 = 32,
    /// `x[a:b]`
    Slice3 = 33,
    /// `x[:] = v`
    StoreSlice0 = 40,
    /// `x[a:] = v`
    StoreSlice1 = 41,
    /// `x[:b] = v`
    StoreSlice2 = 42,
    /// `x[a:b] = v`
    StoreSlice3 = 43,
    /// `del x[:]`
    DeleteSlice0 = 50,
    /// `del x[a:]`
    DeleteSlice1 = 51,
    /// `del x[:b]`
    DeleteSlice2 = 52,
    /// `del x[a:b]`
    DeleteSlice3 = 53,

    // ===== Stores and in-place arithmetic =====
    /// Store a key/value pair into a map under construction
    StoreMap = 54,
    /// `x += y`
    InplaceAdd = 55,
    /// `x -= y`
    InplaceSubtract = 56,
    /// `x *= y`
    InplaceMultiply = 57,
    /// `x /= y` (classic division)
    InplaceDivide = 58,
    /// `x %= y`
    InplaceModulo = 59,
    /// `x[y] = v`
    StoreSubscr = 60,
    /// `del x[y]`
    DeleteSubscr = 61,
    /// `x << y`
    BinaryLshift = 62,
    /// `x >> y`
    BinaryRshift = 63,
    /// `x & y`
    BinaryAnd = 64,
    /// `x ^ y`
    BinaryXor = 65,
    /// `x | y`
    BinaryOr = 66,
    /// `x **= y`
    InplacePower = 67,
    /// Replace the top of stack with its iterator
    GetIter = 68,

    // ===== Print statement =====
    /// Print the top of stack in expression-statement position
    PrintExpr = 70,
    /// Print one value to stdout
    PrintItem = 71,
    /// Print a newline to stdout
    PrintNewline = 72,
    /// Print one value to an explicit stream
    PrintItemTo = 73,
    /// Print a newline to an explicit stream
    PrintNewlineTo = 74,
    /// `x <<= y`
    InplaceLshift = 75,
    /// `x >>= y`
    InplaceRshift = 76,
    /// `x &= y`
    InplaceAnd = 77,
    /// `x ^= y`
    InplaceXor = 78,
    /// `x |= y`
    InplaceOr = 79,

    // ===== Control flow and blocks =====
    /// Exit the innermost loop
    BreakLoop = 80,
    /// Clean up after a `with` block
    WithCleanup = 81,
    /// Push the local namespace dictionary
    LoadLocals = 82,
    /// Return the top of stack to the caller
    ReturnValue = 83,
    /// `from module import *`
    ImportStar = 84,
    /// `exec` statement
    ExecStmt = 85,
    /// Yield the top of stack from a generator
    YieldValue = 86,
    /// Pop the innermost block frame
    PopBlock = 87,
    /// Terminate a `finally` clause
    EndFinally = 88,
    /// Build a class object
    BuildClass = 89,

    // ===== Opcodes with an immediate (>= HAVE_ARGUMENT) =====
    /// `name = TOS`
    StoreName = 90,
    /// `del name`
    DeleteName = 91,
    /// Unpack a sequence into `arg` stack slots
    UnpackSequence = 92,
    /// Advance an iterator or jump when exhausted
    ForIter = 93,
    /// Append to the list `arg` slots down (list comprehensions)
    ListAppend = 94,
    /// `x.attr = TOS`
    StoreAttr = 95,
    /// `del x.attr`
    DeleteAttr = 96,
    /// `global = TOS`
    StoreGlobal = 97,
    /// `del global`
    DeleteGlobal = 98,
    /// Duplicate the top `arg` values (arg is 2 or 3)
    DupTopx = 99,
    /// Push constant pool entry `arg`
    LoadConst = 100,
    /// Push the value bound to a name
    LoadName = 101,
    /// Build a tuple from the top `arg` values
    BuildTuple = 102,
    /// Build a list from the top `arg` values
    BuildList = 103,
    /// Build a set from the top `arg` values
    BuildSet = 104,
    /// Build an empty map (arg is a size hint)
    BuildMap = 105,
    /// `x.attr`
    LoadAttr = 106,
    /// Comparison selected by `arg`
    CompareOp = 107,
    /// `import name`
    ImportName = 108,
    /// `from name import attr`
    ImportFrom = 109,
    /// Relative unconditional jump
    JumpForward = 110,
    /// Jump if false, popping only on fall-through
    JumpIfFalseOrPop = 111,
    /// Jump if true, popping only on fall-through
    JumpIfTrueOrPop = 112,
    /// Absolute unconditional jump
    JumpAbsolute = 113,
    /// Pop and jump if false
    PopJumpIfFalse = 114,
    /// Pop and jump if true
    PopJumpIfTrue = 115,
    /// Push a module-level binding
    LoadGlobal = 116,
    /// Jump to the head of the innermost loop
    ContinueLoop = 119,
    /// Enter a loop block ending `arg` bytes ahead
    SetupLoop = 120,
    /// Enter an exception handler block
    SetupExcept = 121,
    /// Enter a `finally` block
    SetupFinally = 122,
    /// Push local slot `arg`
    LoadFast = 124,
    /// Pop into local slot `arg`
    StoreFast = 125,
    /// Clear local slot `arg`
    DeleteFast = 126,
    /// `raise` with `arg` operands (0 to 3)
    RaiseVarargs = 130,
    /// Call with `arg & 0xff` positional and `arg >> 8` keyword pairs
    CallFunction = 131,
    /// Build a function object
    MakeFunction = 132,
    /// Build a slice object from `arg` operands (2 or 3)
    BuildSlice = 133,
    /// Build a closure over captured cells
    MakeClosure = 134,
    /// Push a closure cell
    LoadClosure = 135,
    /// Push the value held in a cell
    LoadDeref = 136,
    /// Pop into a cell
    StoreDeref = 137,
    /// Call with a `*args` tail
    CallFunctionVar = 140,
    /// Call with a `**kwargs` tail
    CallFunctionKw = 141,
    /// Call with both `*args` and `**kwargs`
    CallFunctionVarKw = 142,
    /// Enter a `with` block
    SetupWith = 143,
    /// Extend the next opcode's immediate past 16 bits
    ExtendedArg = 145,
    /// Add to the set `arg` slots down (set comprehensions)
    SetAdd = 146,
    /// Insert into the map `arg` slots down (dict comprehensions)
    MapAdd = 147,

    // ===== Synthetic opcodes (recompiled output only) =====
    /// Release one reference to a register's value
    Decref = 148,
    /// Acquire one reference to a register's value
    Incref = 149,
    /// Read element `arg` of a sequence register
    ConstIndex = 150,
}

impl Opcode {
    /// Convert a raw bytecode byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::StopCode),
            1 => Some(Self::PopTop),
            2 => Some(Self::RotTwo),
            3 => Some(Self::RotThree),
            4 => Some(Self::DupTop),
            5 => Some(Self::RotFour),
            9 => Some(Self::Nop),

            10 => Some(Self::UnaryPositive),
            11 => Some(Self::UnaryNegative),
            12 => Some(Self::UnaryNot),
            13 => Some(Self::UnaryConvert),
            15 => Some(Self::UnaryInvert),

            19 => Some(Self::BinaryPower),
            20 => Some(Self::BinaryMultiply),
            21 => Some(Self::BinaryDivide),
            22 => Some(Self::BinaryModulo),
            23 => Some(Self::BinaryAdd),
            24 => Some(Self::BinarySubtract),
            25 => Some(Self::BinarySubscr),
            26 => Some(Self::BinaryFloorDivide),
            27 => Some(Self::BinaryTrueDivide),
            28 => Some(Self::InplaceFloorDivide),
            29 => Some(Self::InplaceTrueDivide),

            30 => Some(Self::Slice0),
            31 => Some(Self::Slice1),
            32 => Some(Self::Slice2),
            33 => Some(Self::Slice3),
            40 => Some(Self::StoreSlice0),
            41 => Some(Self::StoreSlice1),
            42 => Some(Self::StoreSlice2),
            43 => Some(Self::StoreSlice3),
            50 => Some(Self::DeleteSlice0),
            51 => Some(Self::DeleteSlice1),
            52 => Some(Self::DeleteSlice2),
            53 => Some(Self::DeleteSlice3),

            54 => Some(Self::StoreMap),
            55 => Some(Self::InplaceAdd),
            56 => Some(Self::InplaceSubtract),
            57 => Some(Self::InplaceMultiply),
            58 => Some(Self::InplaceDivide),
            59 => Some(Self::InplaceModulo),
            60 => Some(Self::StoreSubscr),
            61 => Some(Self::DeleteSubscr),
            62 => Some(Self::BinaryLshift),
            63 => Some(Self::BinaryRshift),
            64 => Some(Self::BinaryAnd),
            65 => Some(Self::BinaryXor),
            66 => Some(Self::BinaryOr),
            67 => Some(Self::InplacePower),
            68 => Some(Self::GetIter),

            70 => Some(Self::PrintExpr),
            71 => Some(Self::PrintItem),
            72 => Some(Self::PrintNewline),
            73 => Some(Self::PrintItemTo),
            74 => Some(Self::PrintNewlineTo),
            75 => Some(Self::InplaceLshift),
            76 => Some(Self::InplaceRshift),
            77 => Some(Self::InplaceAnd),
            78 => Some(Self::InplaceXor),
            79 => Some(Self::InplaceOr),

            80 => Some(Self::BreakLoop),
            81 => Some(Self::WithCleanup),
            82 => Some(Self::LoadLocals),
            83 => Some(Self::ReturnValue),
            84 => Some(Self::ImportStar),
            85 => Some(Self::ExecStmt),
            86 => Some(Self::YieldValue),
            87 => Some(Self::PopBlock),
            88 => Some(Self::EndFinally),
            89 => Some(Self::BuildClass),

            90 => Some(Self::StoreName),
            91 => Some(Self::DeleteName),
            92 => Some(Self::UnpackSequence),
            93 => Some(Self::ForIter),
            94 => Some(Self::ListAppend),
            95 => Some(Self::StoreAttr),
            96 => Some(Self::DeleteAttr),
            97 => Some(Self::StoreGlobal),
            98 => Some(Self::DeleteGlobal),
            99 => Some(Self::DupTopx),
            100 => Some(Self::LoadConst),
            101 => Some(Self::LoadName),
            102 => Some(Self::BuildTuple),
            103 => Some(Self::BuildList),
            104 => Some(Self::BuildSet),
            105 => Some(Self::BuildMap),
            106 => Some(Self::LoadAttr),
            107 => Some(Self::CompareOp),
            108 => Some(Self::ImportName),
            109 => Some(Self::ImportFrom),
            110 => Some(Self::JumpForward),
            111 => Some(Self::JumpIfFalseOrPop),
            112 => Some(Self::JumpIfTrueOrPop),
            113 => Some(Self::JumpAbsolute),
            114 => Some(Self::PopJumpIfFalse),
            115 => Some(Self::PopJumpIfTrue),
            116 => Some(Self::LoadGlobal),
            119 => Some(Self::ContinueLoop),
            120 => Some(Self::SetupLoop),
            121 => Some(Self::SetupExcept),
            122 => Some(Self::SetupFinally),
            124 => Some(Self::LoadFast),
            125 => Some(Self::StoreFast),
            126 => Some(Self::DeleteFast),
            130 => Some(Self::RaiseVarargs),
            131 => Some(Self::CallFunction),
            132 => Some(Self::MakeFunction),
            133 => Some(Self::BuildSlice),
            134 => Some(Self::MakeClosure),
            135 => Some(Self::LoadClosure),
            136 => Some(Self::LoadDeref),
            137 => Some(Self::StoreDeref),
            140 => Some(Self::CallFunctionVar),
            141 => Some(Self::CallFunctionKw),
            142 => Some(Self::CallFunctionVarKw),
            143 => Some(Self::SetupWith),
            145 => Some(Self::ExtendedArg),
            146 => Some(Self::SetAdd),
            147 => Some(Self::MapAdd),

            148 => Some(Self::Decref),
            149 => Some(Self::Incref),
            150 => Some(Self::ConstIndex),

            _ => None,
        }
    }

    /// Convert the opcode to its byte value
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Does this opcode carry a 16-bit immediate?
    #[inline]
    pub fn has_arg(self) -> bool {
        self.to_u8() >= HAVE_ARGUMENT
    }

    /// Instruction width in the source byte stream: 1 byte, or 3 with an
    /// immediate.
    #[inline]
    pub fn instr_size(self) -> usize {
        if self.has_arg() {
            3
        } else {
            1
        }
    }

    /// Is this opcode a branch in the lowered output?
    ///
    /// Branch ops are serialized with a label field that lowering patches to
    /// an absolute byte offset. `RETURN_VALUE` shares the branch encoding but
    /// carries no label.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::ForIter
                | Self::BreakLoop
                | Self::ContinueLoop
                | Self::ReturnValue
        )
    }

    /// Does this opcode take a variable-length register list?
    ///
    /// Covers the call and literal-builder families, plus the slice forms
    /// that carry more registers than the fixed three-slot encoding holds.
    pub fn is_varargs(self) -> bool {
        matches!(
            self,
            Self::CallFunction
                | Self::CallFunctionVar
                | Self::CallFunctionKw
                | Self::CallFunctionVarKw
                | Self::BuildTuple
                | Self::BuildList
                | Self::BuildSet
                | Self::BuildSlice
                | Self::Slice3
                | Self::StoreSlice3
        )
    }

    /// Is this opcode free of side effects beyond writing its destination?
    ///
    /// Pure ops may be dropped by dead-code elimination when nothing reads
    /// their destination register.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Self::LoadLocals
                | Self::LoadConst
                | Self::LoadName
                | Self::BuildTuple
                | Self::BuildList
                | Self::BuildSet
                | Self::BuildMap
                | Self::MakeClosure
                | Self::LoadGlobal
                | Self::LoadFast
                | Self::LoadDeref
                | Self::LoadClosure
                | Self::BuildSlice
                | Self::ConstIndex
                | Self::StoreFast
        )
    }

    /// Human-readable opcode name
    pub fn name(self) -> &'static str {
        match self {
            Self::StopCode => "STOP_CODE",
            Self::PopTop => "POP_TOP",
            Self::RotTwo => "ROT_TWO",
            Self::RotThree => "ROT_THREE",
            Self::DupTop => "DUP_TOP",
            Self::RotFour => "ROT_FOUR",
            Self::Nop => "NOP",
            Self::UnaryPositive => "UNARY_POSITIVE",
            Self::UnaryNegative => "UNARY_NEGATIVE",
            Self::UnaryNot => "UNARY_NOT",
            Self::UnaryConvert => "UNARY_CONVERT",
            Self::UnaryInvert => "UNARY_INVERT",
            Self::BinaryPower => "BINARY_POWER",
            Self::BinaryMultiply => "BINARY_MULTIPLY",
            Self::BinaryDivide => "BINARY_DIVIDE",
            Self::BinaryModulo => "BINARY_MODULO",
            Self::BinaryAdd => "BINARY_ADD",
            Self::BinarySubtract => "BINARY_SUBTRACT",
            Self::BinarySubscr => "BINARY_SUBSCR",
            Self::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Self::BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Self::InplaceFloorDivide => "INPLACE_FLOOR_DIVIDE",
            Self::InplaceTrueDivide => "INPLACE_TRUE_DIVIDE",
            Self::Slice0 => "SLICE+0",
            Self::Slice1 => "SLICE+1",
            Self::Slice2 => "SLICE+2",
            Self::Slice3 => "SLICE+3",
            Self::StoreSlice0 => "STORE_SLICE+0",
            Self::StoreSlice1 => "STORE_SLICE+1",
            Self::StoreSlice2 => "STORE_SLICE+2",
            Self::StoreSlice3 => "STORE_SLICE+3",
            Self::DeleteSlice0 => "DELETE_SLICE+0",
            Self::DeleteSlice1 => "DELETE_SLICE+1",
            Self::DeleteSlice2 => "DELETE_SLICE+2",
            Self::DeleteSlice3 => "DELETE_SLICE+3",
            Self::StoreMap => "STORE_MAP",
            Self::InplaceAdd => "INPLACE_ADD",
            Self::InplaceSubtract => "INPLACE_SUBTRACT",
            Self::InplaceMultiply => "INPLACE_MULTIPLY",
            Self::InplaceDivide => "INPLACE_DIVIDE",
            Self::InplaceModulo => "INPLACE_MODULO",
            Self::StoreSubscr => "STORE_SUBSCR",
            Self::DeleteSubscr => "DELETE_SUBSCR",
            Self::BinaryLshift => "BINARY_LSHIFT",
            Self::BinaryRshift => "BINARY_RSHIFT",
            Self::BinaryAnd => "BINARY_AND",
            Self::BinaryXor => "BINARY_XOR",
            Self::BinaryOr => "BINARY_OR",
            Self::InplacePower => "INPLACE_POWER",
            Self::GetIter => "GET_ITER",
            Self::PrintExpr => "PRINT_EXPR",
            Self::PrintItem => "PRINT_ITEM",
            Self::PrintNewline => "PRINT_NEWLINE",
            Self::PrintItemTo => "PRINT_ITEM_TO",
            Self::PrintNewlineTo => "PRINT_NEWLINE_TO",
            Self::InplaceLshift => "INPLACE_LSHIFT",
            Self::InplaceRshift => "INPLACE_RSHIFT",
            Self::InplaceAnd => "INPLACE_AND",
            Self::InplaceXor => "INPLACE_XOR",
            Self::InplaceOr => "INPLACE_OR",
            Self::BreakLoop => "BREAK_LOOP",
            Self::WithCleanup => "WITH_CLEANUP",
            Self::LoadLocals => "LOAD_LOCALS",
            Self::ReturnValue => "RETURN_VALUE",
            Self::ImportStar => "IMPORT_STAR",
            Self::ExecStmt => "EXEC_STMT",
            Self::YieldValue => "YIELD_VALUE",
            Self::PopBlock => "POP_BLOCK",
            Self::EndFinally => "END_FINALLY",
            Self::BuildClass => "BUILD_CLASS",
            Self::StoreName => "STORE_NAME",
            Self::DeleteName => "DELETE_NAME",
            Self::UnpackSequence => "UNPACK_SEQUENCE",
            Self::ForIter => "FOR_ITER",
            Self::ListAppend => "LIST_APPEND",
            Self::StoreAttr => "STORE_ATTR",
            Self::DeleteAttr => "DELETE_ATTR",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::DeleteGlobal => "DELETE_GLOBAL",
            Self::DupTopx => "DUP_TOPX",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadName => "LOAD_NAME",
            Self::BuildTuple => "BUILD_TUPLE",
            Self::BuildList => "BUILD_LIST",
            Self::BuildSet => "BUILD_SET",
            Self::BuildMap => "BUILD_MAP",
            Self::LoadAttr => "LOAD_ATTR",
            Self::CompareOp => "COMPARE_OP",
            Self::ImportName => "IMPORT_NAME",
            Self::ImportFrom => "IMPORT_FROM",
            Self::JumpForward => "JUMP_FORWARD",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::JumpAbsolute => "JUMP_ABSOLUTE",
            Self::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Self::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::ContinueLoop => "CONTINUE_LOOP",
            Self::SetupLoop => "SETUP_LOOP",
            Self::SetupExcept => "SETUP_EXCEPT",
            Self::SetupFinally => "SETUP_FINALLY",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::DeleteFast => "DELETE_FAST",
            Self::RaiseVarargs => "RAISE_VARARGS",
            Self::CallFunction => "CALL_FUNCTION",
            Self::MakeFunction => "MAKE_FUNCTION",
            Self::BuildSlice => "BUILD_SLICE",
            Self::MakeClosure => "MAKE_CLOSURE",
            Self::LoadClosure => "LOAD_CLOSURE",
            Self::LoadDeref => "LOAD_DEREF",
            Self::StoreDeref => "STORE_DEREF",
            Self::CallFunctionVar => "CALL_FUNCTION_VAR",
            Self::CallFunctionKw => "CALL_FUNCTION_KW",
            Self::CallFunctionVarKw => "CALL_FUNCTION_VAR_KW",
            Self::SetupWith => "SETUP_WITH",
            Self::ExtendedArg => "EXTENDED_ARG",
            Self::SetAdd => "SET_ADD",
            Self::MapAdd => "MAP_ADD",
            Self::Decref => "DECREF",
            Self::Incref => "INCREF",
            Self::ConstIndex => "CONST_INDEX",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
