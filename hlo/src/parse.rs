use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while1};
use nom::character::complete::{alpha1, digit1, multispace0, multispace1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::multi::{many0, many1, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{IResult, Parser};
use nom_language::error::{VerboseError, convert_error};

use crate::internal::*;

type R<'i, O> = IResult<&'i str, O, VerboseError<&'i str>>;

/// Instruction as written, before its opcode and attributes are interpreted.
#[derive(Debug)]
struct RawInstruction<'i> {
    is_root: bool,
    name: &'i str,
    shape: Shape,
    opcode: &'i str,
    operands: Vec<(Option<Shape>, &'i str)>,
    attributes: Vec<(&'i str, &'i str)>,
}

/// Parse and validate an HLO module holding a single entry computation.
pub fn parse_module(text: &str) -> HloResult<HloModule> {
    let (name, entry_name, raw) = match all_consuming(module).parse(text) {
        Ok((_, it)) => it,
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            bail!("Failed to parse HLO module:\n{}", convert_error(text, e))
        }
        Err(nom::Err::Incomplete(_)) => bail!("Failed to parse HLO module: incomplete input"),
    };
    trace!("Parsed {} instructions in module {}", raw.len(), name);
    let instructions = raw
        .into_iter()
        .map(|inst| {
            let name = inst.name.to_string();
            build_instruction(inst).with_context(|| format!("Building instruction {name:?}"))
        })
        .collect::<HloResult<Vec<_>>>()?;
    let module =
        HloModule { name: name.to_string(), entry_name: entry_name.to_string(), instructions };
    module.validate()?;
    Ok(module)
}

fn build_instruction(raw: RawInstruction) -> HloResult<Instruction> {
    let mut attributes: HashMap<&str, &str> = HashMap::new();
    for &(key, value) in &raw.attributes {
        ensure!(attributes.insert(key, value).is_none(), "Duplicate attribute {:?}", key);
    }
    let (op, operands) = match raw.opcode {
        "parameter" => {
            let [(None, number)] = &*raw.operands else {
                bail!("parameter expects a single parameter number")
            };
            let number = number
                .parse::<usize>()
                .with_context(|| format!("Bad parameter number {number:?}"))?;
            (Op::Parameter(number), tvec!())
        }
        "convolution" => {
            let mut take = |key: &str| {
                attributes.remove(key).with_context(|| format!("convolution requires {key}"))
            };
            let window: Window = take("window")?.parse()?;
            let dim_labels: ConvDimensionNumbers = take("dim_labels")?.parse()?;
            let feature_group_count = match attributes.remove("feature_group_count") {
                Some(n) => n
                    .parse::<usize>()
                    .with_context(|| format!("Bad feature_group_count {n:?}"))?,
                None => 1,
            };
            let operands = raw
                .operands
                .into_iter()
                .map(|(shape, name)| Operand { shape, name: name.to_string() })
                .collect();
            (Op::Convolution(Convolution { window, dim_labels, feature_group_count }), operands)
        }
        other => bail!("Unsupported opcode {:?}", other),
    };
    if let Some(key) = attributes.keys().next() {
        bail!("Unsupported attribute {:?} for {}", key, raw.opcode);
    }
    let name = raw.name.to_string();
    Ok(Instruction { name, shape: raw.shape, op, operands, is_root: raw.is_root })
}

// <module> ::= "HloModule" <name> <computation>
fn module(i: &str) -> R<'_, (&str, &str, Vec<RawInstruction<'_>>)> {
    map(
        delimited(spaces, pair(preceded(stag("HloModule"), spaced(name)), computation), spaces),
        |(module_name, (entry, instructions))| (module_name, entry, instructions),
    )
    .parse(i)
}

// <computation> ::= "ENTRY" <name> "{" <instruction>+ "}"
fn computation(i: &str) -> R<'_, (&str, Vec<RawInstruction<'_>>)> {
    pair(
        preceded(stag("ENTRY"), spaced(name)),
        delimited(stag("{"), many1(instruction), stag("}")),
    )
    .parse(i)
}

// <instruction> ::= ["ROOT"] <name> "=" <shape> <opcode> "(" <operands> ")" ("," <attribute>)*
fn instruction(i: &str) -> R<'_, RawInstruction<'_>> {
    let (i, _) = spaces(i)?;
    let (i, is_root) = map(opt(terminated(tag("ROOT"), multispace1)), |r| r.is_some()).parse(i)?;
    let (i, inst_name) = name(i)?;
    let (i, _) = stag("=").parse(i)?;
    let (i, shape) = shape(i)?;
    let (i, opcode) = spaced(name).parse(i)?;
    let (i, operands) =
        delimited(stag("("), separated_list0(stag(","), operand), stag(")")).parse(i)?;
    let (i, attributes) = many0(preceded(stag(","), attribute)).parse(i)?;
    Ok((i, RawInstruction { is_root, name: inst_name, shape, opcode, operands, attributes }))
}

// <operand> ::= [<shape>] <name>
fn operand(i: &str) -> R<'_, (Option<Shape>, &str)> {
    pair(opt(terminated(shape, multispace1)), spaced(name)).parse(i)
}

// <attribute> ::= <name> "=" ( "{" <anything-but-}> "}" | <token> )
fn attribute(i: &str) -> R<'_, (&str, &str)> {
    pair(
        terminated(spaced(name), stag("=")),
        alt((
            delimited(tag("{"), take_until("}"), tag("}")),
            take_while1(|c: char| !c.is_whitespace() && !",{}()".contains(c)),
        )),
    )
    .parse(i)
}

// <shape> ::= <element-type> "[" <dims> "]" ["{" <layout> "}"]
fn shape(i: &str) -> R<'_, Shape> {
    let (i, element_type) =
        map_res(alt((tag("bf16"), tag("f16"), tag("f32"))), str::parse::<PrimitiveType>).parse(i)?;
    let (i, dims) = delimited(stag("["), separated_list0(stag(","), numeric), stag("]")).parse(i)?;
    let (i, layout) =
        opt(delimited(stag("{"), separated_list0(stag(","), numeric), tag("}"))).parse(i)?;
    let mut shape = Shape::new(element_type, dims);
    if let Some(layout) = layout {
        shape = shape.with_layout(Layout::new(layout));
    }
    Ok((i, shape))
}

fn name(i: &str) -> R<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"), digit1)),
        many0(alt((take_while1(|c: char| c.is_alphanumeric()), tag("_"), tag("."), tag("-")))),
    ))
    .parse(i)
}

fn numeric(i: &str) -> R<'_, usize> {
    map_res(spaced(digit1), str::parse::<usize>).parse(i)
}

fn spaces(i: &str) -> R<'_, ()> {
    map(multispace0, |_| ()).parse(i)
}

fn spaced<'s, O, P>(it: P) -> impl Parser<&'s str, Output = O, Error = VerboseError<&'s str>>
where
    P: Parser<&'s str, Output = O, Error = VerboseError<&'s str>>,
{
    delimited(spaces, it, spaces)
}

fn stag<'s>(
    t: &'static str,
) -> impl Parser<&'s str, Output = &'s str, Error = VerboseError<&'s str>> {
    spaced(tag(t))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_shape() {
        let (rest, s) = shape("bf16[1,2, 3,4]{3,0,2,1} x").unwrap();
        assert_eq!(rest, " x");
        assert_eq!(s.to_string(), "bf16[1,2,3,4]{3,0,2,1}");
        let (_, s) = shape("f32[7]").unwrap();
        assert_eq!(s.layout, None);
    }

    #[test]
    fn parse_names() {
        assert_eq!(name("conv.1-a rest").unwrap(), (" rest", "conv.1-a"));
        assert_eq!(name("0)").unwrap(), (")", "0"));
        assert!(name("=x").is_err());
    }

    #[test]
    fn parse_attribute() {
        assert_eq!(
            attribute(" window={size=3x3 stride=2x1}, x").unwrap(),
            (", x", ("window", "size=3x3 stride=2x1"))
        );
        assert_eq!(
            attribute(" feature_group_count=16\n }").unwrap(),
            ("\n }", ("feature_group_count", "16"))
        );
    }

    #[test]
    fn parse_minimal_module() {
        let m = parse_module(
            "HloModule m\n ENTRY e { ROOT p = f32[2,3] parameter(0) }",
        )
        .unwrap();
        assert_eq!(m.instructions.len(), 1);
        assert_eq!(m.root().unwrap().op, Op::Parameter(0));
    }

    #[test]
    fn syntax_errors_point_at_the_input() {
        let e = parse_module("HloModule m\n ENTRY e { ROOT p = f32[2,x] parameter(0) }")
            .unwrap_err()
            .to_string();
        assert!(e.starts_with("Failed to parse HLO module"), "{e}");
        assert!(e.contains("line 2"), "{e}");
    }

    #[test]
    fn reject_unknown_opcode() {
        let e = parse_module("HloModule m\n ENTRY e { ROOT p = f32[2] tanh(0) }").unwrap_err();
        assert!(format!("{e:?}").contains("Unsupported opcode"));
    }
}
