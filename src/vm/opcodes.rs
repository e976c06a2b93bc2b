pub const ICONST_M1: u8 = 2;
pub const ICONST_0: u8 = 3;
pub const ICONST_1: u8 = 4;
pub const ICONST_2: u8 = 5;
pub const ICONST_3: u8 = 6;
pub const ICONST_4: u8 = 7;
pub const ICONST_5: u8 = 8;
pub const BIPUSH: u8 = 16;
pub const LDC: u8 = 18;

pub const ILOAD: u8 = 21;
pub const ALOAD: u8 = 25;
pub const ILOAD_0: u8 = 26;
pub const ILOAD_1: u8 = 27;
pub const ILOAD_2: u8 = 28;
pub const ILOAD_3: u8 = 29;
pub const ALOAD_0: u8 = 42;
pub const ALOAD_1: u8 = 43;
pub const ALOAD_2: u8 = 44;
pub const ALOAD_3: u8 = 45;
pub const IALOAD: u8 = 46;
pub const CALOAD: u8 = 52;

pub const ISTORE: u8 = 54;
pub const ASTORE: u8 = 58;
pub const ISTORE_0: u8 = 59;
pub const ISTORE_1: u8 = 60;
pub const ISTORE_2: u8 = 61;
pub const ISTORE_3: u8 = 62;
pub const ASTORE_0: u8 = 75;
pub const ASTORE_1: u8 = 76;
pub const ASTORE_2: u8 = 77;
pub const ASTORE_3: u8 = 78;
pub const IASTORE: u8 = 79;
pub const CASTORE: u8 = 85;

pub const POP: u8 = 87;
pub const DUP: u8 = 89;

pub const IADD: u8 = 96;
pub const ISUB: u8 = 100;
pub const IMUL: u8 = 104;
pub const IREM: u8 = 112;
pub const ISHL: u8 = 120;
pub const ISHR: u8 = 122;
pub const IUSHR: u8 = 124;
pub const IINC: u8 = 132;

pub const IFEQ: u8 = 153;
pub const IFNE: u8 = 154;
pub const IFGE: u8 = 156;
pub const IFLE: u8 = 158;
pub const IF_ICMPEQ: u8 = 159;
pub const IF_ICMPNE: u8 = 160;
pub const IF_ICMPLT: u8 = 161;
pub const IF_ICMPGE: u8 = 162;
pub const IF_ICMPGT: u8 = 163;
pub const GOTO: u8 = 167;

pub const IRETURN: u8 = 172;
pub const ARETURN: u8 = 176;
pub const RETURN: u8 = 177;

pub const GETSTATIC: u8 = 178;
pub const PUTSTATIC: u8 = 179;
pub const GETFIELD: u8 = 180;
pub const PUTFIELD: u8 = 181;
pub const INVOKEVIRTUAL: u8 = 182;
pub const INVOKESPECIAL: u8 = 183;
pub const INVOKESTATIC: u8 = 184;
pub const INVOKEDYNAMIC: u8 = 186;
pub const NEW: u8 = 187;
pub const NEWARRAY: u8 = 188;
pub const ARRAYLENGTH: u8 = 190;
pub const MONITORENTER: u8 = 194;
pub const MONITOREXIT: u8 = 195;

// newarray type codes
pub const T_CHAR: u8 = 5;
pub const T_INT: u8 = 10;
