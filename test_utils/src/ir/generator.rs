//! Random legacy Nette presenter code for property-based testing.
//!
//! The generator produces plain data describing a presenter method that
//! builds a form: a construction followed by field calls. Tests turn it into
//! syntax trees with whatever builder they use, so this crate does not depend
//! on the rewriter itself.
//!
//! Field methods are drawn mostly from the known Nette field API, with a few
//! unknown methods mixed in so that "leave unrecognized calls alone" is
//! exercised as well.

use std::fmt;

use quickcheck::{Arbitrary, Gen};

/// Field methods understood by the form migration.
pub const KNOWN_FIELD_METHODS: &[&str] = &[
    "addText",
    "addPassword",
    "addTextArea",
    "addEmail",
    "addInteger",
    "addHidden",
    "addUpload",
    "addMultiUpload",
    "addSubmit",
    "addButton",
    "addCheckbox",
    "addSelect",
    "addRadioList",
    "addCheckboxList",
    "addMultiSelect",
];

/// Methods that must never be rewritten.
pub const UNKNOWN_FIELD_METHODS: &[&str] = &["addDateTime", "addContainer", "addGroup", "setDefaults"];

/// Choice-family methods, whose third argument is the item list.
pub const CHOICE_METHODS: &[&str] = &["addSelect", "addRadioList", "addCheckboxList", "addMultiSelect"];

/// Reserved words that would not make valid variable names.
const RESERVED_KEYWORDS: &[&str] = &["this", "new", "class", "function", "return", "array", "list"];

/// One positional argument of a legacy call.
#[derive(Clone, Debug, PartialEq)]
pub enum LegacyArg {
    Str(String),
    Int(i64),
    Bool(bool),
    Var(String),
    /// `['key' => 'value', ...]`
    Items(Vec<(String, String)>),
}

/// `$form->method('name', args...)`
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyFormCall {
    pub method: String,
    pub name: String,
    pub args: Vec<LegacyArg>,
}

impl LegacyFormCall {
    pub fn is_known(&self) -> bool {
        KNOWN_FIELD_METHODS.contains(&self.method.as_str())
    }

    pub fn is_choice(&self) -> bool {
        CHOICE_METHODS.contains(&self.method.as_str())
    }
}

/// A presenter with one action building a form.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyPresenter {
    pub namespace: Option<String>,
    pub class_name: String,
    pub form_var: String,
    pub calls: Vec<LegacyFormCall>,
}

fn gen_range(g: &mut Gen, min: u32, max: u32) -> u32 {
    min + (u32::arbitrary(g) % (max - min + 1))
}

/// Generates a random variable name that is not a reserved word.
fn gen_var_name(g: &mut Gen) -> String {
    let starters: Vec<char> = "abcdefghijklmnopqrstuvwxyz".chars().collect();
    let continuers: Vec<char> = "abcdefghijklmnopqrstuvwxyz0123456789_".chars().collect();
    loop {
        let len = gen_range(g, 1, 8);
        let mut name = String::new();
        name.push(*g.choose(&starters).unwrap());
        for _ in 1..len {
            name.push(*g.choose(&continuers).unwrap());
        }
        if !RESERVED_KEYWORDS.contains(&name.as_str()) {
            return name;
        }
    }
}

fn gen_class_name(g: &mut Gen) -> String {
    let mut name = gen_var_name(g);
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    name.push_str("Presenter");
    name
}

/// Printable string content without quotes or backslashes.
fn gen_string_content(g: &mut Gen) -> String {
    let len = gen_range(g, 0, 12);
    (0..len)
        .map(|_| {
            let mut c = char::arbitrary(g);
            while c.is_control() || c == '\'' || c == '"' || c == '\\' {
                c = char::arbitrary(g);
            }
            c
        })
        .collect()
}

impl Arbitrary for LegacyArg {
    fn arbitrary(g: &mut Gen) -> Self {
        match gen_range(g, 0, 5) {
            0 | 1 => LegacyArg::Str(gen_string_content(g)),
            2 => LegacyArg::Int(i64::from(i32::arbitrary(g))),
            3 => LegacyArg::Bool(bool::arbitrary(g)),
            4 => LegacyArg::Var(gen_var_name(g)),
            _ => {
                let len = gen_range(g, 0, 4);
                LegacyArg::Items(
                    (0..len)
                        .map(|_| (gen_var_name(g), gen_string_content(g)))
                        .collect(),
                )
            }
        }
    }
}

impl Arbitrary for LegacyFormCall {
    fn arbitrary(g: &mut Gen) -> Self {
        let method = if gen_range(g, 0, 9) == 0 {
            g.choose(UNKNOWN_FIELD_METHODS).unwrap()
        } else {
            g.choose(KNOWN_FIELD_METHODS).unwrap()
        };
        let mut args = Vec::new();
        // Label first, mostly a string
        if bool::arbitrary(g) {
            args.push(if gen_range(g, 0, 4) == 0 {
                LegacyArg::arbitrary(g)
            } else {
                LegacyArg::Str(gen_string_content(g))
            });
            if CHOICE_METHODS.contains(method) && bool::arbitrary(g) {
                let len = gen_range(g, 1, 4);
                args.push(LegacyArg::Items(
                    (0..len)
                        .map(|_| (gen_var_name(g), gen_string_content(g)))
                        .collect(),
                ));
            }
            for _ in 0..gen_range(g, 0, 2) {
                args.push(LegacyArg::arbitrary(g));
            }
        }
        LegacyFormCall {
            method: method.to_string(),
            name: gen_var_name(g),
            args,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let base = self.clone();
        Box::new((0..self.args.len()).rev().map(move |len| {
            let mut smaller = base.clone();
            smaller.args.truncate(len);
            smaller
        }))
    }
}

impl Arbitrary for LegacyPresenter {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = gen_range(g, 1, 6);
        LegacyPresenter {
            namespace: if bool::arbitrary(g) {
                Some(format!("App\\{}", gen_class_name(g).trim_end_matches("Presenter")))
            } else {
                None
            },
            class_name: gen_class_name(g),
            form_var: gen_var_name(g),
            calls: (0..count).map(|_| LegacyFormCall::arbitrary(g)).collect(),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let base = self.clone();
        Box::new((1..self.calls.len()).rev().map(move |len| {
            let mut smaller = base.clone();
            smaller.calls.truncate(len);
            smaller
        }))
    }
}

impl fmt::Display for LegacyArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyArg::Str(s) => write!(f, "'{}'", s),
            LegacyArg::Int(i) => write!(f, "{}", i),
            LegacyArg::Bool(b) => write!(f, "{}", b),
            LegacyArg::Var(v) => write!(f, "${}", v),
            LegacyArg::Items(items) => {
                let parts: Vec<String> = items.iter().map(|(k, v)| format!("'{}' => '{}'", k, v)).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl LegacyPresenter {
    /// PHP source the presenter stands for, for failure messages.
    pub fn to_code(&self) -> String {
        let mut code = String::from("<?php\n");
        if let Some(ns) = &self.namespace {
            code.push_str(&format!("namespace {};\n", ns));
        }
        code.push_str(&format!(
            "class {} extends \\Nette\\Application\\UI\\Presenter\n{{\n    public function createComponentForm()\n    {{\n",
            self.class_name
        ));
        code.push_str(&format!("        ${} = new \\Nette\\Application\\UI\\Form;\n", self.form_var));
        for call in &self.calls {
            let mut args = vec![format!("'{}'", call.name)];
            args.extend(call.args.iter().map(|a| a.to_string()));
            code.push_str(&format!("        ${}->{}({});\n", self.form_var, call.method, args.join(", ")));
        }
        code.push_str("    }\n}\n");
        code
    }
}
