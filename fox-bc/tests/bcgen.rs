use fox_ast::{AstContext, BuiltinKind};
use fox_bc::{BytecodeModule, Instr};
use fox_common::{BufferConsumer, DiagnosticEngine, SourceManager};
use fox_lex::Lexer;
use fox_parse::Parser;

fn compile(src: &str) -> BytecodeModule {
    let mut sm = SourceManager::new();
    let file = sm.load_string("test.fox", src);
    let (consumer, store) = BufferConsumer::new();
    let mut diags = DiagnosticEngine::new(&sm, Box::new(consumer));
    let mut ctx = AstContext::new();
    let tokens = Lexer::new(&mut ctx, &mut diags, file, sm.content(file)).lex();
    let name = ctx.ident("test");
    let unit =
        Parser::new(&mut ctx, &mut diags, file, sm.content(file), &tokens).parse_unit(name);
    fox_sema::check_unit(&mut ctx, &mut diags, unit);
    assert!(
        !diags.had_errors(),
        "unexpected diagnostics: {:?}",
        store.borrow().iter().map(|d| d.id).collect::<Vec<_>>()
    );
    fox_bc::generate_module(&ctx, &mut diags, unit)
}

fn function_instrs<'m>(module: &'m BytecodeModule, name: &str) -> &'m [Instr] {
    let entry = module
        .functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no function named {name}"));
    &module.instrs[entry.range.start as usize..entry.range.end as usize]
}

#[test]
fn arithmetic_literals_lower_to_small_int_stores() {
    let module = compile("func main() { let x : int = -5 + 3 * 2; }");
    let body = function_instrs(&module, "main");

    let stored: Vec<i16> = body
        .iter()
        .filter_map(|i| match i {
            Instr::StoreSmallInt { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(stored, vec![-5, 3, 2]);

    assert_eq!(
        body.iter()
            .filter(|i| matches!(i, Instr::MulInt { .. }))
            .count(),
        1
    );
    // The addition writes straight into x's register (r0); no copy needed.
    let add = body
        .iter()
        .find_map(|i| match i {
            Instr::AddInt { dst, .. } => Some(*dst),
            _ => None,
        })
        .expect("no AddInt emitted");
    assert_eq!(add, 0);
    assert!(!body.iter().any(|i| matches!(i, Instr::Copy { .. })));
}

#[test]
fn string_plus_char_lowers_to_promoted_concat() {
    let module = compile(r#"func greet(c : char) : string { return "hi " + c; }"#);
    let body = function_instrs(&module, "greet");

    assert!(body
        .iter()
        .any(|i| matches!(i, Instr::LoadStringK { .. })));
    let builtins: Vec<BuiltinKind> = body
        .iter()
        .filter_map(|i| match i {
            Instr::LoadBuiltinFunc { builtin, .. } => Some(*builtin),
            _ => None,
        })
        .collect();
    assert_eq!(
        builtins,
        vec![BuiltinKind::StrConcat, BuiltinKind::CharToString]
    );
    // Two calls: one producing the promoted char, one producing the result.
    assert_eq!(
        body.iter()
            .filter(|i| matches!(i, Instr::Call { .. }))
            .count(),
        2
    );
}

#[test]
fn char_plus_char_uses_char_concat() {
    let module = compile("func f(a : char, b : char) : string { return a + b; }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(
        i,
        Instr::LoadBuiltinFunc { builtin: BuiltinKind::CharConcat, .. }
    )));
}

#[test]
fn large_int_literals_go_through_the_constant_pool() {
    let module = compile("let big : int = 100000;");
    assert_eq!(module.constants.ints, vec![100000]);
    let init = &module.instrs
        [module.globals[0].init_range.start as usize..module.globals[0].init_range.end as usize];
    assert!(init.iter().any(|i| matches!(i, Instr::LoadIntK { k: 0, .. })));
    assert!(init.iter().any(|i| matches!(i, Instr::SetGlobal { global: 0, .. })));
}

#[test]
fn empty_string_literal_allocates_instead_of_loading() {
    let module = compile(r#"func f() : string { return ""; }"#);
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(i, Instr::NewString { .. })));
    assert!(module.constants.strings.is_empty());
}

#[test]
fn useless_casts_vanish_and_conversions_emit_instructions() {
    // -x as int on a double: conversion instruction, applied to (-x).
    let module = compile("func f(x : double) : int { return -x as int; }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(i, Instr::NegDouble { .. })));
    assert!(body.iter().any(|i| matches!(i, Instr::DoubleToInt { .. })));

    let module = compile("func g(x : double) : double { return x as double; }");
    let body = function_instrs(&module, "g");
    assert!(!body.iter().any(|i| matches!(i, Instr::DoubleToInt { .. })
        || matches!(i, Instr::IntToDouble { .. })));
}

#[test]
fn greater_comparisons_are_synthesized() {
    let module = compile("func f(a : int, b : int) : bool { return a > b; }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(i, Instr::LEInt { .. })));
    assert!(body.iter().any(|i| matches!(i, Instr::LNot { .. })));

    // >= swaps operands instead.
    let module = compile("func g(a : int, b : int) : bool { return a >= b; }");
    let body = function_instrs(&module, "g");
    let le = body
        .iter()
        .find_map(|i| match i {
            Instr::LEInt { lhs, rhs, .. } => Some((*lhs, *rhs)),
            _ => None,
        })
        .expect("no LEInt emitted");
    assert_eq!(le, (1, 0));
    assert!(!body.iter().any(|i| matches!(i, Instr::LNot { .. })));
}

#[test]
fn doubles_use_their_own_comparison_ops() {
    let module = compile("func f(a : double, b : double) : bool { return a > b; }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(i, Instr::GTDouble { .. })));
    assert!(!body.iter().any(|i| matches!(i, Instr::LNot { .. })));
}

#[test]
fn subscripts_lower_to_builtin_calls() {
    let module = compile("func f(xs : [int], s : string) : int { let c : char = s[0]; return xs[1]; }");
    let body = function_instrs(&module, "f");
    let builtins: Vec<BuiltinKind> = body
        .iter()
        .filter_map(|i| match i {
            Instr::LoadBuiltinFunc { builtin, .. } => Some(*builtin),
            _ => None,
        })
        .collect();
    assert!(builtins.contains(&BuiltinKind::GetChar));
    assert!(builtins.contains(&BuiltinKind::ArrGet));
}

#[test]
fn array_literals_allocate_then_append() {
    let module = compile("let xs : [int] = [1, 2, 3];");
    let init = &module.instrs
        [module.globals[0].init_range.start as usize..module.globals[0].init_range.end as usize];
    let alloc = init
        .iter()
        .find_map(|i| match i {
            Instr::NewValueArray { capacity, .. } => Some(*capacity),
            _ => None,
        })
        .expect("no array allocation");
    assert_eq!(alloc, 3);
    assert_eq!(
        init.iter()
            .filter(|i| matches!(i, Instr::CallVoid { .. }))
            .count(),
        3
    );

    // Reference element types allocate a ref array.
    let module = compile(r#"let ss : [string] = ["a"];"#);
    let init = &module.instrs
        [module.globals[0].init_range.start as usize..module.globals[0].init_range.end as usize];
    assert!(init.iter().any(|i| matches!(i, Instr::NewRefArray { .. })));
}

#[test]
fn calls_reserve_consecutive_registers() {
    let module = compile(
        "func add(a : int, b : int) : int { return a + b; }\n\
         func main() : int { return add(1, 2); }",
    );
    let body = function_instrs(&module, "main");
    let load = body
        .iter()
        .find_map(|i| match i {
            Instr::LoadFunc { dst, func } => Some((*dst, *func)),
            _ => None,
        })
        .expect("no LoadFunc emitted");
    assert_eq!(load.1, 0);
    let base = load.0;
    // Arguments follow the callee.
    let stores: Vec<u8> = body
        .iter()
        .filter_map(|i| match i {
            Instr::StoreSmallInt { dst, .. } => Some(*dst),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![base + 1, base + 2]);
    assert!(body.iter().any(|i| matches!(i, Instr::Call { .. })));
}

#[test]
fn void_calls_use_call_void() {
    let module = compile(
        "func log(x : int) { }\n\
         func main() { log(3); }",
    );
    let body = function_instrs(&module, "main");
    assert!(body.iter().any(|i| matches!(i, Instr::CallVoid { .. })));
    assert!(!body.iter().any(|i| matches!(i, Instr::Call { .. })));
}

#[test]
fn member_calls_pass_the_base_first() {
    let module = compile("func f(xs : mut [int]) { xs.append(7); }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(
        i,
        Instr::LoadBuiltinFunc { builtin: BuiltinKind::ArrAppend, .. }
    )));
    assert!(body.iter().any(|i| matches!(i, Instr::CallVoid { .. })));
}

#[test]
fn each_global_gets_its_own_slot() {
    let module = compile("let a : int = 1;\nlet b : int = 2;");
    assert_eq!(module.globals.len(), 2);
    assert_eq!(module.globals[0].name, "a");
    assert_eq!(module.globals[1].name, "b");
    let ids: Vec<u16> = module
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::SetGlobal { global, .. } => Some(*global),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![0, 1]);
}

#[test]
fn global_assignment_emits_set_global() {
    let module = compile("var g : int = 0; func f() { g = 3; }");
    let body = function_instrs(&module, "f");
    assert!(body
        .iter()
        .any(|i| matches!(i, Instr::SetGlobal { global: 0, .. })));
}

#[test]
fn subscript_assignment_lowers_to_arr_set() {
    let module = compile("func f(xs : mut [int]) { xs[0] = 4; }");
    let body = function_instrs(&module, "f");
    assert!(body.iter().any(|i| matches!(
        i,
        Instr::LoadBuiltinFunc { builtin: BuiltinKind::ArrSet, .. }
    )));
}

/// Every jump in every instruction range must land inside that range.
fn assert_jumps_closed(module: &BytecodeModule) {
    let ranges = module
        .functions
        .iter()
        .map(|f| f.range.clone())
        .chain(module.globals.iter().map(|g| g.init_range.clone()));
    for range in ranges {
        for idx in range.clone() {
            let offset = match module.instrs[idx as usize] {
                Instr::Jump { offset } => offset,
                Instr::CondJump { offset, .. } => offset,
                _ => continue,
            };
            let target = idx as i64 + 1 + offset as i64;
            assert!(
                target >= range.start as i64 && target <= range.end as i64,
                "jump at {idx} lands at {target}, outside {range:?}"
            );
        }
    }
}

#[test]
fn conditionals_and_loops_produce_closed_jumps() {
    let module = compile(
        "func f(n : mut int) : int {\n\
             var total : int = 0;\n\
             while n > 0 {\n\
                 if n % 2 == 0 { total = total + n; } else { total = total - 1; }\n\
                 n = n - 1;\n\
             }\n\
             return total;\n\
         }",
    );
    assert_jumps_closed(&module);
    let body = function_instrs(&module, "f");
    // One loop back-edge: a jump with a negative offset.
    assert!(body.iter().any(|i| matches!(i, Instr::Jump { offset } if *offset < 0)));
}

#[test]
fn functions_end_with_a_return() {
    let module = compile("func f() { } func g(x : int) { if x { return; } }");
    for name in ["f", "g"] {
        let body = function_instrs(&module, name);
        assert!(matches!(body.last(), Some(Instr::Return)), "{name} does not end in Return");
    }
    assert_jumps_closed(&module);
}

#[test]
fn function_entries_describe_their_frames() {
    let module = compile(
        "func add(a : int, b : int) : int { let t : int = a + b; return t; }\n\
         func log(x : int) { }",
    );
    let add = &module.functions[0];
    assert_eq!(add.name, "add");
    assert_eq!(add.param_count, 2);
    assert!(!add.returns_void);
    // Two params plus one local; temporaries reuse freed space.
    assert!(add.register_count >= 3);

    let log = &module.functions[1];
    assert!(log.returns_void);
}

#[test]
fn runtime_faulting_instructions_carry_debug_ranges() {
    let module = compile("func f(a : int, b : int) : int { return a / b; }");
    let body_range = module.functions[0].range.clone();
    let div_idx = (body_range.start..body_range.end)
        .find(|&i| matches!(module.instrs[i as usize], Instr::DivInt { .. }))
        .expect("no DivInt emitted");
    assert!(module.debug_ranges.contains_key(&div_idx));
}
