//! End-to-end assembly of hand-built abstract streams.

use pyforge::{
    AssembleError, AssembleOptions, Bytecode, ConstantData, Instr, InstrArg, Op, PythonVersion,
    Target,
};

const V38: PythonVersion = PythonVersion::V3_8;

fn instr(code: &Bytecode, op: Op, arg: InstrArg) -> Instr {
    Instr::new(code.version(), op, arg).unwrap()
}

#[test]
fn hello_world() {
    let mut code = Bytecode::new(V38);
    code.push(instr(&code, Op::LoadName, InstrArg::Name("print".into())));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const("Hello".into())));
    code.push(instr(&code, Op::CallFunction, InstrArg::Raw(1)));
    code.push(instr(&code, Op::PopTop, InstrArg::None));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let concrete = code.to_concrete().unwrap();
    assert_eq!(concrete.names, vec!["print".to_owned()]);
    assert_eq!(
        concrete.consts,
        vec![ConstantData::from("Hello"), ConstantData::None]
    );

    let compiled = code.to_code().unwrap();
    assert_eq!(compiled.code.len(), 12);
    assert_eq!(compiled.stacksize, 2);
    // LOAD_NAME 0, LOAD_CONST 0, CALL_FUNCTION 1, POP_TOP, LOAD_CONST 1,
    // RETURN_VALUE under the 3.8 numbering.
    assert_eq!(
        compiled.code,
        vec![101, 0, 100, 0, 131, 1, 1, 0, 100, 1, 83, 0]
    );
}

#[test]
fn conditional_jump_with_small_offsets() {
    // print("yes" if test else "no")
    let mut code = Bytecode::new(V38);
    let l_else = code.new_label();
    let l_print = code.new_label();
    code.push(instr(&code, Op::LoadName, InstrArg::Name("print".into())));
    code.push(instr(&code, Op::LoadName, InstrArg::Name("test".into())));
    code.push(instr(
        &code,
        Op::PopJumpIfFalse,
        InstrArg::Jump(Target::Label(l_else)),
    ));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const("yes".into())));
    code.push(instr(
        &code,
        Op::JumpForward,
        InstrArg::Jump(Target::Label(l_print)),
    ));
    code.push_label(l_else);
    code.push(instr(&code, Op::LoadConst, InstrArg::Const("no".into())));
    code.push_label(l_print);
    code.push(instr(&code, Op::CallFunction, InstrArg::Raw(1)));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let concrete = code.to_concrete().unwrap();

    // Small offsets never need EXTENDED_ARG, so the first pass settles.
    assert!(concrete.instrs.iter().all(|i| i.size_units() == 1));

    // POP_JUMP_IF_FALSE is absolute (in bytes) on 3.8: LOAD_CONST "no"
    // sits at unit 5, byte 10. JUMP_FORWARD is relative: one unit, 2 bytes.
    assert_eq!(concrete.instrs[2].op(), Op::PopJumpIfFalse);
    assert_eq!(concrete.instrs[2].arg(), 10);
    assert_eq!(concrete.instrs[4].op(), Op::JumpForward);
    assert_eq!(concrete.instrs[4].arg(), 2);

    // Disassembling lands the labels back on the same instructions.
    let back = concrete.to_bytecode().unwrap();
    let ops: Vec<Op> = back.instrs().map(Instr::op).collect();
    assert_eq!(
        ops,
        vec![
            Op::LoadName,
            Op::LoadName,
            Op::PopJumpIfFalse,
            Op::LoadConst,
            Op::JumpForward,
            Op::LoadConst,
            Op::CallFunction,
            Op::LoadConst,
            Op::ReturnValue,
        ]
    );
}

#[test]
fn large_forward_jump_grows_one_prefix() {
    let mut code = Bytecode::new(V38);
    let target = code.new_label();
    code.push(instr(
        &code,
        Op::JumpForward,
        InstrArg::Jump(Target::Label(target)),
    ));
    for _ in 0..300 {
        code.push(instr(&code, Op::LoadFast, InstrArg::Local("x".into())));
    }
    code.push_label(target);
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let concrete = code.to_concrete().unwrap();

    // 300 instructions of 2 bytes each put the target 600 bytes out, which
    // needs exactly one EXTENDED_ARG.
    assert_eq!(concrete.instrs[0].op(), Op::JumpForward);
    assert_eq!(concrete.instrs[0].arg(), 600);
    assert_eq!(concrete.instrs[0].size_units(), 2);

    let compiled = concrete.to_code_with(Some(1), &AssembleOptions::default()).unwrap();
    let extended_arg_count = compiled
        .code
        .chunks_exact(2)
        .filter(|unit| unit[0] == 144)
        .count();
    assert_eq!(extended_arg_count, 1);
    assert_eq!(compiled.code[..4], [144, 0x02, 110, 0x58]);
}

#[test]
fn jumps_to_a_missing_label_are_rejected() {
    let mut code = Bytecode::new(V38);
    let label = code.new_label();
    // The label is never inserted into the stream.
    code.push(instr(
        &code,
        Op::JumpForward,
        InstrArg::Jump(Target::Label(label)),
    ));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let err = code.to_concrete().unwrap_err();
    assert_eq!(err, AssembleError::UnresolvedLabel(label));
}

#[test]
fn backward_magnitudes_use_the_backward_opcode() {
    let version = PythonVersion::V3_11;
    let mut code = Bytecode::new(version);
    let top = code.new_label();
    code.push_label(top);
    code.push(Instr::new(version, Op::Nop, InstrArg::None).unwrap());
    code.push(
        Instr::new(
            version,
            Op::JumpBackward,
            InstrArg::Jump(Target::Label(top)),
        )
        .unwrap(),
    );

    let concrete = code.to_concrete().unwrap();
    // The delta is emitted as a positive magnitude.
    assert_eq!(concrete.instrs[1].op(), Op::JumpBackward);
    assert_eq!(concrete.instrs[1].arg(), 2);
}

#[test]
fn forward_opcodes_cannot_reach_backwards() {
    let mut code = Bytecode::new(V38);
    let top = code.new_label();
    code.push_label(top);
    code.push(instr(&code, Op::Nop, InstrArg::None));
    code.push(instr(
        &code,
        Op::JumpForward,
        InstrArg::Jump(Target::Label(top)),
    ));

    let err = code.to_concrete().unwrap_err();
    assert!(matches!(err, AssembleError::JumpOutOfRange { .. }));
}

#[test]
fn pools_deduplicate_by_constant_key() {
    let mut code = Bytecode::new(V38);
    for value in [
        ConstantData::from(1i64),
        ConstantData::from(1.0f64),
        ConstantData::from(true),
        ConstantData::from(1i64),
        ConstantData::from(-0.0f64),
        ConstantData::from(1.0f64),
    ] {
        code.push(instr(&code, Op::LoadConst, InstrArg::Const(value)));
        code.push(instr(&code, Op::PopTop, InstrArg::None));
    }
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let concrete = code.to_concrete().unwrap();
    // 1, 1.0 and True are distinct; -0.0 is distinct from 1.0; repeats
    // reuse their first index.
    assert_eq!(concrete.consts.len(), 5);
    let const_args: Vec<u32> = concrete
        .instrs
        .iter()
        .filter(|i| i.op() == Op::LoadConst)
        .map(|i| i.arg())
        .collect();
    assert_eq!(const_args, vec![0, 1, 2, 0, 3, 1, 4]);
}

#[test]
fn argnames_seed_the_varnames_pool() {
    let mut code = Bytecode::new(V38);
    code.meta.argcount = 2;
    code.argnames = vec!["a".into(), "b".into()];
    // Only `b` and a new local are used in the body.
    code.push(instr(&code, Op::LoadFast, InstrArg::Local("b".into())));
    code.push(instr(&code, Op::StoreFast, InstrArg::Local("tmp".into())));
    code.push(instr(&code, Op::LoadConst, InstrArg::Const(ConstantData::None)));
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    let concrete = code.to_concrete().unwrap();
    assert_eq!(concrete.varnames, vec!["a", "b", "tmp"]);
    assert_eq!(concrete.instrs[0].arg(), 1);
    assert_eq!(concrete.instrs[1].arg(), 2);
}

#[test]
fn caches_are_emitted_on_311() {
    let version = PythonVersion::V3_11;
    let mut code = Bytecode::new(version);
    code.push(
        Instr::new(
            version,
            Op::LoadGlobal,
            InstrArg::LoadGlobal {
                push_null: true,
                name: "print".into(),
            },
        )
        .unwrap(),
    );
    code.push(Instr::new(version, Op::ReturnValue, InstrArg::None).unwrap());

    let concrete = code.to_concrete().unwrap();
    let cache_count = concrete
        .instrs
        .iter()
        .filter(|i| i.op() == Op::Cache)
        .count();
    assert_eq!(cache_count, 5);
    // push_null lands in the low bit, the name index above it.
    assert_eq!(concrete.instrs[0].arg(), 1);
}

#[test]
fn unstable_jumps_hit_the_pass_budget() {
    let mut code = Bytecode::new(V38);
    let target = code.new_label();
    code.push(instr(
        &code,
        Op::JumpForward,
        InstrArg::Jump(Target::Label(target)),
    ));
    for _ in 0..300 {
        code.push(instr(&code, Op::LoadFast, InstrArg::Local("x".into())));
    }
    code.push_label(target);
    code.push(instr(&code, Op::ReturnValue, InstrArg::None));

    // One pass cannot both discover the wide argument and settle on it.
    let options = AssembleOptions {
        compute_jumps_passes: 1,
        ..AssembleOptions::default()
    };
    let err = code.to_concrete_with(&options).unwrap_err();
    assert_eq!(err, AssembleError::JumpsUnstable { passes: 1 });
}
