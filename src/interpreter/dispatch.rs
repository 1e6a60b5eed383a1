//! The opcode-indexed processor table, populated once at VM construction.
//! Shortcut opcodes share the handler of their generic form; the decoder
//! already normalized their operands.

use crate::bytecode::Instruction;
use crate::bytecode::opcodes::*;
use crate::error::VmError;
use crate::interpreter::Flow;
use crate::interpreter::handlers as h;
use crate::thread::VmThread;
use crate::vm::VirtualMachine;

pub(crate) type Processor =
    fn(&mut VmThread, &VirtualMachine, &Instruction) -> Result<Flow, VmError>;

pub(crate) struct DispatchTable {
    table: [Processor; OPCODE_COUNT],
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut table: [Processor; OPCODE_COUNT] = [h::unsupported; OPCODE_COUNT];

        table[NOP as usize] = h::nop;
        table[ACONST_NULL as usize] = h::const_null;
        for opcode in ICONST_M1..=ICONST_5 {
            table[opcode as usize] = h::const_int;
        }
        table[LCONST_0 as usize] = h::const_long;
        table[LCONST_1 as usize] = h::const_long;
        for opcode in FCONST_0..=FCONST_2 {
            table[opcode as usize] = h::const_float;
        }
        table[DCONST_0 as usize] = h::const_double;
        table[DCONST_1 as usize] = h::const_double;
        table[BIPUSH as usize] = h::const_int;
        table[SIPUSH as usize] = h::const_int;
        table[LDC as usize] = h::load_constant;
        table[LDC_W as usize] = h::load_constant;
        table[LDC2_W as usize] = h::load_constant;

        table[ILOAD as usize] = h::load_int;
        table[LLOAD as usize] = h::load_long;
        table[FLOAD as usize] = h::load_float;
        table[DLOAD as usize] = h::load_double;
        table[ALOAD as usize] = h::load_reference;
        for opcode in ILOAD_0..=ILOAD_3 {
            table[opcode as usize] = h::load_int;
        }
        for opcode in LLOAD_0..=LLOAD_3 {
            table[opcode as usize] = h::load_long;
        }
        for opcode in FLOAD_0..=FLOAD_3 {
            table[opcode as usize] = h::load_float;
        }
        for opcode in DLOAD_0..=DLOAD_3 {
            table[opcode as usize] = h::load_double;
        }
        for opcode in ALOAD_0..=ALOAD_3 {
            table[opcode as usize] = h::load_reference;
        }

        for opcode in [IALOAD, LALOAD, FALOAD, DALOAD, AALOAD, BALOAD, CALOAD, SALOAD] {
            table[opcode as usize] = h::array_load;
        }

        table[ISTORE as usize] = h::store_int;
        table[LSTORE as usize] = h::store_long;
        table[FSTORE as usize] = h::store_float;
        table[DSTORE as usize] = h::store_double;
        table[ASTORE as usize] = h::store_reference;
        for opcode in ISTORE_0..=ISTORE_3 {
            table[opcode as usize] = h::store_int;
        }
        for opcode in LSTORE_0..=LSTORE_3 {
            table[opcode as usize] = h::store_long;
        }
        for opcode in FSTORE_0..=FSTORE_3 {
            table[opcode as usize] = h::store_float;
        }
        for opcode in DSTORE_0..=DSTORE_3 {
            table[opcode as usize] = h::store_double;
        }
        for opcode in ASTORE_0..=ASTORE_3 {
            table[opcode as usize] = h::store_reference;
        }

        for opcode in [IASTORE, BASTORE, CASTORE, SASTORE] {
            table[opcode as usize] = h::array_store_int;
        }
        table[LASTORE as usize] = h::array_store_long;
        table[FASTORE as usize] = h::array_store_float;
        table[DASTORE as usize] = h::array_store_double;
        table[AASTORE as usize] = h::array_store_reference;

        table[POP as usize] = h::pop;
        table[POP2 as usize] = h::pop2;
        table[DUP as usize] = h::dup;
        table[DUP_X1 as usize] = h::dup_x1;
        table[DUP_X2 as usize] = h::dup_x2;
        table[DUP2 as usize] = h::dup2;
        table[DUP2_X1 as usize] = h::dup2_x1;
        table[DUP2_X2 as usize] = h::dup2_x2;
        table[SWAP as usize] = h::swap;

        table[IADD as usize] = h::int_add;
        table[LADD as usize] = h::long_add;
        table[FADD as usize] = h::float_add;
        table[DADD as usize] = h::double_add;
        table[ISUB as usize] = h::int_sub;
        table[LSUB as usize] = h::long_sub;
        table[FSUB as usize] = h::float_sub;
        table[DSUB as usize] = h::double_sub;
        table[IMUL as usize] = h::int_mul;
        table[LMUL as usize] = h::long_mul;
        table[FMUL as usize] = h::float_mul;
        table[DMUL as usize] = h::double_mul;
        table[IDIV as usize] = h::int_div;
        table[LDIV as usize] = h::long_div;
        table[FDIV as usize] = h::float_div;
        table[DDIV as usize] = h::double_div;
        table[IREM as usize] = h::int_rem;
        table[LREM as usize] = h::long_rem;
        table[FREM as usize] = h::float_rem;
        table[DREM as usize] = h::double_rem;
        table[INEG as usize] = h::int_neg;
        table[LNEG as usize] = h::long_neg;
        table[FNEG as usize] = h::float_neg;
        table[DNEG as usize] = h::double_neg;
        table[ISHL as usize] = h::int_shl;
        table[LSHL as usize] = h::long_shl;
        table[ISHR as usize] = h::int_shr;
        table[LSHR as usize] = h::long_shr;
        table[IUSHR as usize] = h::int_ushr;
        table[LUSHR as usize] = h::long_ushr;
        table[IAND as usize] = h::int_and;
        table[LAND as usize] = h::long_and;
        table[IOR as usize] = h::int_or;
        table[LOR as usize] = h::long_or;
        table[IXOR as usize] = h::int_xor;
        table[LXOR as usize] = h::long_xor;
        table[IINC as usize] = h::iinc;

        table[I2L as usize] = h::i2l;
        table[I2F as usize] = h::i2f;
        table[I2D as usize] = h::i2d;
        table[L2I as usize] = h::l2i;
        table[L2F as usize] = h::l2f;
        table[L2D as usize] = h::l2d;
        table[F2I as usize] = h::f2i;
        table[F2L as usize] = h::f2l;
        table[F2D as usize] = h::f2d;
        table[D2I as usize] = h::d2i;
        table[D2L as usize] = h::d2l;
        table[D2F as usize] = h::d2f;
        table[I2B as usize] = h::i2b;
        table[I2C as usize] = h::i2c;
        table[I2S as usize] = h::i2s;

        table[LCMP as usize] = h::lcmp;
        table[FCMPL as usize] = h::fcmpl;
        table[FCMPG as usize] = h::fcmpg;
        table[DCMPL as usize] = h::dcmpl;
        table[DCMPG as usize] = h::dcmpg;

        table[IFEQ as usize] = h::if_eq;
        table[IFNE as usize] = h::if_ne;
        table[IFLT as usize] = h::if_lt;
        table[IFGE as usize] = h::if_ge;
        table[IFGT as usize] = h::if_gt;
        table[IFLE as usize] = h::if_le;
        table[IF_ICMPEQ as usize] = h::if_icmpeq;
        table[IF_ICMPNE as usize] = h::if_icmpne;
        table[IF_ICMPLT as usize] = h::if_icmplt;
        table[IF_ICMPGE as usize] = h::if_icmpge;
        table[IF_ICMPGT as usize] = h::if_icmpgt;
        table[IF_ICMPLE as usize] = h::if_icmple;
        table[IF_ACMPEQ as usize] = h::if_acmpeq;
        table[IF_ACMPNE as usize] = h::if_acmpne;
        table[IFNULL as usize] = h::if_null;
        table[IFNONNULL as usize] = h::if_non_null;
        table[GOTO as usize] = h::goto;
        table[GOTO_W as usize] = h::goto;
        table[TABLESWITCH as usize] = h::table_switch;
        table[LOOKUPSWITCH as usize] = h::lookup_switch;

        table[IRETURN as usize] = h::return_int;
        table[LRETURN as usize] = h::return_long;
        table[FRETURN as usize] = h::return_float;
        table[DRETURN as usize] = h::return_double;
        table[ARETURN as usize] = h::return_reference;
        table[RETURN as usize] = h::return_void;

        table[GETSTATIC as usize] = h::get_static;
        table[PUTSTATIC as usize] = h::put_static;
        table[GETFIELD as usize] = h::get_field;
        table[PUTFIELD as usize] = h::put_field;

        table[INVOKEVIRTUAL as usize] = h::invoke_virtual;
        table[INVOKESPECIAL as usize] = h::invoke_special;
        table[INVOKESTATIC as usize] = h::invoke_static;
        table[INVOKEINTERFACE as usize] = h::invoke_interface;
        table[INVOKEDYNAMIC as usize] = h::invoke_dynamic;

        table[NEW as usize] = h::new_instance;
        table[NEWARRAY as usize] = h::new_array;
        table[ANEWARRAY as usize] = h::new_reference_array;
        table[MULTIANEWARRAY as usize] = h::multi_new_array;
        table[ARRAYLENGTH as usize] = h::array_length;
        table[ATHROW as usize] = h::athrow;
        table[CHECKCAST as usize] = h::check_cast;
        table[INSTANCEOF as usize] = h::instance_of;
        table[MONITORENTER as usize] = h::monitor_enter;
        table[MONITOREXIT as usize] = h::monitor_exit;

        Self { table }
    }

    pub fn processor(&self, opcode: u8) -> Processor {
        self.table
            .get(opcode as usize)
            .copied()
            .unwrap_or(h::unsupported)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
