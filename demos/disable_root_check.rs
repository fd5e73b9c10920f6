use dexpatch::container::opcodes::{OP_CONST_4, OP_RETURN};
use dexpatch::patch::{Patch, PatchContext, PatchError, PatchResult};
use dexpatch::patcher::Patcher;
use dexpatch::signatures::{MethodFingerprint, Signature};
use dexpatch::types::{Instruction, TypeSignature};
use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::rc::Rc;

// This demo loads a class container, finds the root-detection method by its
// shape (boolean return, references an "su" path string) and stubs it to
// return false, then writes the patched container(s) next to the input.

//Usage: disable_root_check <container-file>
fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <container-file>", args[0]);
        std::process::exit(1);
    }

    match process(&args[1]) {
        Ok(_) => println!("All done."),
        Err(e) => eprintln!("Aborted due to error: {e:?}"),
    }
}

struct DisableRootCheck {
    signature: Rc<Signature>,
}

impl DisableRootCheck {
    fn new() -> Result<DisableRootCheck, Box<dyn Error>> {
        let signature = Signature::new(
            "root-check",
            MethodFingerprint {
                return_type: Some(TypeSignature::Bool),
                parameters: Some(vec![]),
                strings: Some(vec!["su".to_string()]),
                ..MethodFingerprint::default()
            },
        )?;
        Ok(DisableRootCheck { signature })
    }
}

impl Patch for DisableRootCheck {
    fn name(&self) -> &str {
        "disable-root-check"
    }

    fn description(&self) -> &str {
        "stubs the root-detection method to always return false"
    }

    fn signatures(&self) -> Vec<Rc<Signature>> {
        vec![self.signature.clone()]
    }

    fn apply(&self, _ctx: &mut PatchContext) -> PatchResult {
        let result = self
            .signature
            .result()
            .ok_or_else(|| PatchError::unresolved(self.signature.name()))?;
        let mut proxy = result.proxy.borrow_mut();
        let class_name = proxy.original().name.as_java_type();
        let class = proxy.for_mutation();
        let target = &mut class.methods[result.method_index];
        target.code = vec![
            Instruction::with_literal(OP_CONST_4, vec![0], 0),
            Instruction::plain(OP_RETURN, vec![0]),
        ];
        Ok(Some(format!("stubbed {}.{}", class_name, target.name)))
    }
}

fn process(path: &str) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(path)?;
    let mut patcher = Patcher::from_bytes(&bytes)?;
    println!("{} classes loaded.", patcher.pool().len());

    patcher.add_patches(vec![Box::new(DisableRootCheck::new()?)])?;
    patcher.resolve_signatures()?;

    let reports = patcher.apply_patches(false, |name| println!("Applying {name}"))?;
    for report in &reports {
        match &report.outcome {
            Ok(Some(info)) => println!("{}: {}", report.name, info),
            Ok(None) => println!("{}: ok", report.name),
            Err(e) => println!("{}: failed ({})", report.name, e),
        }
    }

    let out_dir = Path::new(path).parent().unwrap_or(Path::new("."));
    for (name, bytes) in patcher.save()? {
        let out = out_dir.join(format!("patched_{name}"));
        fs::write(&out, bytes)?;
        println!("Wrote {}", out.display());
    }
    Ok(())
}
