/// Identifies one function of the builtin runtime surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BuiltinKind {
    IntToString = 0,
    DoubleToString,
    BoolToString,
    CharToString,
    StrConcat,
    CharConcat,
    GetChar,
    ArrAppend,
    ArrPop,
    ArrSize,
    ArrGet,
    ArrSet,
    ArrFront,
    ArrBack,
    ArrReset,
    StrNumBytes,
    StrLength,
}

impl BuiltinKind {
    pub const ALL: [BuiltinKind; 17] = [
        BuiltinKind::IntToString,
        BuiltinKind::DoubleToString,
        BuiltinKind::BoolToString,
        BuiltinKind::CharToString,
        BuiltinKind::StrConcat,
        BuiltinKind::CharConcat,
        BuiltinKind::GetChar,
        BuiltinKind::ArrAppend,
        BuiltinKind::ArrPop,
        BuiltinKind::ArrSize,
        BuiltinKind::ArrGet,
        BuiltinKind::ArrSet,
        BuiltinKind::ArrFront,
        BuiltinKind::ArrBack,
        BuiltinKind::ArrReset,
        BuiltinKind::StrNumBytes,
        BuiltinKind::StrLength,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::IntToString => "intToString",
            BuiltinKind::DoubleToString => "doubleToString",
            BuiltinKind::BoolToString => "boolToString",
            BuiltinKind::CharToString => "charToString",
            BuiltinKind::StrConcat => "strConcat",
            BuiltinKind::CharConcat => "charConcat",
            BuiltinKind::GetChar => "getChar",
            BuiltinKind::ArrAppend => "arrAppend",
            BuiltinKind::ArrPop => "arrPop",
            BuiltinKind::ArrSize => "arrSize",
            BuiltinKind::ArrGet => "arrGet",
            BuiltinKind::ArrSet => "arrSet",
            BuiltinKind::ArrFront => "arrFront",
            BuiltinKind::ArrBack => "arrBack",
            BuiltinKind::ArrReset => "arrReset",
            BuiltinKind::StrNumBytes => "strNumBytes",
            BuiltinKind::StrLength => "strLength",
        }
    }

    pub fn returns_void(self) -> bool {
        matches!(
            self,
            BuiltinKind::ArrAppend | BuiltinKind::ArrPop | BuiltinKind::ArrReset
        )
    }

    pub fn from_u8(raw: u8) -> Option<BuiltinKind> {
        Self::ALL.get(raw as usize).copied()
    }
}

/// One of the fixed member operations on array or string values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinMember {
    StrLength,
    StrNumBytes,
    ArrAppend,
    ArrPop,
    ArrSize,
    ArrFront,
    ArrBack,
    ArrReset,
}

impl BuiltinMember {
    /// The name the member is spelled with after the `.`.
    pub fn member_name(self) -> &'static str {
        match self {
            BuiltinMember::StrLength => "length",
            BuiltinMember::StrNumBytes => "numBytes",
            BuiltinMember::ArrAppend => "append",
            BuiltinMember::ArrPop => "pop",
            BuiltinMember::ArrSize => "size",
            BuiltinMember::ArrFront => "front",
            BuiltinMember::ArrBack => "back",
            BuiltinMember::ArrReset => "reset",
        }
    }

    /// The runtime builtin the member call lowers to.
    pub fn builtin_kind(self) -> BuiltinKind {
        match self {
            BuiltinMember::StrLength => BuiltinKind::StrLength,
            BuiltinMember::StrNumBytes => BuiltinKind::StrNumBytes,
            BuiltinMember::ArrAppend => BuiltinKind::ArrAppend,
            BuiltinMember::ArrPop => BuiltinKind::ArrPop,
            BuiltinMember::ArrSize => BuiltinKind::ArrSize,
            BuiltinMember::ArrFront => BuiltinKind::ArrFront,
            BuiltinMember::ArrBack => BuiltinKind::ArrBack,
            BuiltinMember::ArrReset => BuiltinKind::ArrReset,
        }
    }

    pub const STRING_MEMBERS: [BuiltinMember; 2] =
        [BuiltinMember::StrLength, BuiltinMember::StrNumBytes];

    pub const ARRAY_MEMBERS: [BuiltinMember; 6] = [
        BuiltinMember::ArrAppend,
        BuiltinMember::ArrPop,
        BuiltinMember::ArrSize,
        BuiltinMember::ArrFront,
        BuiltinMember::ArrBack,
        BuiltinMember::ArrReset,
    ];
}
