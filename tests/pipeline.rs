//! Whole-pipeline test over a synthetic program carrying every obfuscation
//! layer at once: hex literals, a string pool with a rotation block, lazy
//! decoders, proxy wrappers, an integrity trap, a dynamic regex and hex
//! arithmetic.

use js_deobfuscator::Deobfuscator;

const OBFUSCATED: &str = r#"var greeting = '\x68\x65\x6c\x6c\x6f';
var target = '\x77'+'\x6f'+'\x72'+'\x6c'+'\x64';
function gather() {
    var pool = ['\x68\x65\x6c\x6c\x6f', '\x77\x6f\x72\x6c\x64', '\x6c\x6f\x67'];
    return gather = function () { return pool; }, gather();
}
(function (arr, answer) {
    var attempts = 0x0;
    while (attempts < 0x64) {
        try {
            var probe = arr().length * answer;
            if (probe === answer) { break; }
            arr().push(arr().shift());
        } catch (e) {
            arr().push(arr().shift());
        }
        attempts++;
    }
}(gather, 0x1f4));
function lookup(n, x) {
    var t = gather();
    lookup = function (i, k) { i = i - 0x12c; var v = t[i]; return v; };
    return lookup(n, x);
}
function cipher(n, x) {
    cipher = function (i, k) {
        var s = lookup(i, k);
        var out = '';
        for (var j = 0x0; j < s.length; j++) {
            out += String.fromCharCode(s.charCodeAt(j) ^ k.charCodeAt(j % k.length));
        }
        return out;
    };
    return cipher(n, x);
}
function bd(a, b, c) { return lookup(c - 0x1, b); }
function be(a, b) { return cipher(a, b); }
if (guard['test'](detect['toString']())) { debugger; }
var pattern = new RegExp('\x5c\x77\x2b', '\x67');
var total = (0x10 + 0x5 * 0x2);
console[lookup(0x12e)](greeting, target, total);
"#;

#[test]
fn recovers_pool_in_declared_order() {
    let output = Deobfuscator::new().run(OBFUSCATED);
    assert_eq!(output.pool, vec!["hello", "world", "log"]);
    assert_eq!(output.report.pool_entries, 3);
}

#[test]
fn resolves_both_decoders() {
    let output = Deobfuscator::new().run(OBFUSCATED);
    let decoders = output.decoders.expect("decoders must resolve");
    assert_eq!(decoders.plain_name(), "lookup");
    assert_eq!(decoders.keyed_name(), "cipher");
    assert_eq!(decoders.plain(0x12c as f64).unwrap(), "hello");
    assert_eq!(decoders.plain(0x12d as f64).unwrap(), "world");

    let expected: String = "hello"
        .chars()
        .map(|c| char::from_u32(c as u32 ^ 'k' as u32).unwrap())
        .collect();
    assert_eq!(decoders.keyed(0x12c as f64, "k").unwrap(), expected);
}

#[test]
fn rewrites_every_layer() {
    let output = Deobfuscator::new().run(OBFUSCATED);
    let code = &output.code;

    // Hex literals decoded, in place and inside the pool declaration.
    assert!(code.contains("var greeting = 'hello';"), "{}", code);
    assert!(code.contains("'world'"));
    assert!(!code.contains("\\x"));

    // Rotation block and proxy wrappers deleted.
    assert!(!code.contains("attempts"));
    assert!(!code.contains("function bd"));
    assert!(!code.contains("function be"));

    // Integrity trap gone, dynamic regex made inert.
    assert!(!code.contains("debugger"));
    assert!(!code.contains("new RegExp"));
    assert!(code.contains("var pattern = /./;"));

    // Hex arithmetic folded, standalone literals decimal.
    assert!(code.contains("var total = 26;"), "{}", code);
    assert!(code.contains("console[lookup(302)]"));

    // Decoder definitions survive; only wrappers were scaffolding.
    assert!(code.contains("function lookup"));
    assert!(code.contains("function cipher"));
}

#[test]
fn reports_a_positive_reduction() {
    let output = Deobfuscator::new().run(OBFUSCATED);
    assert_eq!(output.report.input_bytes, OBFUSCATED.len());
    assert_eq!(output.report.output_bytes, output.code.len());
    assert!(output.report.output_bytes < output.report.input_bytes);
    assert!(output.report.reduction_percent() > 0.0);
    assert!(output.report.decoders_resolved);
}

#[test]
fn runs_are_independent() {
    let deob = Deobfuscator::new();
    let first = deob.run(OBFUSCATED);
    let second = deob.run(OBFUSCATED);
    assert_eq!(first.code, second.code);
    assert_eq!(first.pool, second.pool);
}
