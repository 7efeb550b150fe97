//! Symbol scanner for the C++ expressions carried through the generator.
//!
//! Expressions (cut conditions, weights, fill variables, boost vectors) are
//! opaque to the generator except for the identifiers they reference. The
//! scanner tokenizes an expression and reports its free identifiers; member
//! names after `.`, `->` or `::` are not free. That is enough to cross-check
//! expressions against the topology and boost frames, and to rewrite vector
//! references into another frame.

use ps_core::{Error, Result};

// ── Tokens ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num,
    Ident(String),
    Literal,
    /// `.`, `->` or `::`
    Access,
    Op,
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Token,
    start: usize,
    end: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let offset = |i: usize| chars.get(i).map(|&(o, _)| o).unwrap_or(input.len());
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].1;
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let tok = match c {
            '-' if next == Some('>') => {
                i += 2;
                Token::Access
            }
            ':' if next == Some(':') => {
                i += 2;
                Token::Access
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                i += 1;
                Token::Access
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    match chars[i].1 {
                        '\\' => i += 2,
                        ch if ch == quote => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                if !closed {
                    return Err(Error::validation(format!(
                        "unterminated literal in expression '{input}'"
                    )));
                }
                Token::Literal
            }
            _ if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() {
                    let ch = chars[i].1;
                    let exp_sign = (ch == '+' || ch == '-')
                        && i > start
                        && matches!(chars[i - 1].1, 'e' | 'E');
                    if ch.is_ascii_alphanumeric() || ch == '.' || exp_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                Token::Num
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_')
                {
                    i += 1;
                }
                Token::Ident(input[offset(start)..offset(i)].to_string())
            }
            _ => {
                i += 1;
                Token::Op
            }
        };
        tokens.push(Spanned { tok, start: offset(start), end: offset(i) });
    }

    Ok(tokens)
}

/// Free identifiers of `tokens`, with their byte spans.
fn free_identifiers(tokens: &[Spanned]) -> impl Iterator<Item = (&str, usize, usize)> {
    tokens.iter().enumerate().filter_map(|(i, t)| match &t.tok {
        Token::Ident(name) => {
            let after_access = i > 0 && tokens[i - 1].tok == Token::Access;
            (!after_access).then_some((name.as_str(), t.start, t.end))
        }
        _ => None,
    })
}

// ── Scanned expression ─────────────────────────────────────────

/// Identifiers referenced by an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExprSymbols {
    /// Free identifiers, ordered by first occurrence.
    pub identifiers: Vec<String>,
}

impl ExprSymbols {
    /// Scan an expression string.
    pub fn scan(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut identifiers: Vec<String> = Vec::new();
        for (name, _, _) in free_identifiers(&tokens) {
            if !identifiers.iter().any(|n| n == name) {
                identifiers.push(name.to_string());
            }
        }
        Ok(Self { identifiers })
    }
}

/// Rewrite free identifiers of `input`.
///
/// `rename` returns the replacement for an identifier, or `None` to keep it.
/// Everything else (whitespace, literals, member names) is preserved verbatim.
pub fn rename_identifiers(
    input: &str,
    rename: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let tokens = tokenize(input)?;
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for (name, start, end) in free_identifiers(&tokens) {
        if let Some(new_name) = rename(name) {
            out.push_str(&input[cursor..start]);
            out.push_str(&new_name);
            cursor = end;
        }
    }
    out.push_str(&input[cursor..]);
    Ok(out)
}

// ── Role accessors ─────────────────────────────────────────────

/// Accessor suffixes generated for particle roles, longest first.
const ROLE_ACCESSORS: &[&str] = &["P4_Measured", "X4_Measured", "NeutralID", "TrackID", "P4", "X4"];

/// Species stems used in role names.
const PARTICLE_STEMS: &[&str] = &[
    "Beam",
    "Photon",
    "Electron",
    "Positron",
    "MuonPlus",
    "MuonMinus",
    "PiPlus",
    "PiMinus",
    "Pi0",
    "KPlus",
    "KMinus",
    "KShort",
    "KLong",
    "Eta",
    "EtaPrime",
    "Omega",
    "Phi",
    "Proton",
    "AntiProton",
    "Neutron",
    "AntiNeutron",
    "Lambda",
    "AntiLambda",
    "SigmaPlus",
    "SigmaMinus",
    "Sigma0",
    "XiMinus",
    "Xi0",
    "OmegaMinus",
    "Deuteron",
    "Triton",
    "Helium",
];

/// A local that reads a particle role (`loc<stem><accessor>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAccessor<'a> {
    /// Role stem (role name, or `Beam`).
    pub stem: &'a str,
    /// Accessor suffix, e.g. `P4_Measured`.
    pub accessor: &'static str,
}

/// Split `ident` into a role accessor, ignoring one trailing frame suffix.
pub fn role_accessor<'a>(ident: &'a str, frames: &[String]) -> Option<RoleAccessor<'a>> {
    let body = ident.strip_prefix("loc")?;
    let body = frames
        .iter()
        .find_map(|f| body.strip_suffix(f.as_str()).and_then(|b| b.strip_suffix('_')))
        .unwrap_or(body);
    ROLE_ACCESSORS.iter().find_map(|&accessor| {
        let stem = body.strip_suffix(accessor)?;
        (!stem.is_empty()).then_some(RoleAccessor { stem, accessor })
    })
}

/// Whether `stem` has the shape of a particle role name.
///
/// Accepts an optional `Missing`/`Decaying` prefix, a known species stem and
/// trailing slot digits (`PiPlus2`, `MissingProton`, `Beam`). Composite user
/// names such as `PiPlusPiMinus` do not qualify.
pub fn looks_like_particle_slot(stem: &str) -> bool {
    let rest = stem
        .strip_prefix("Missing")
        .or_else(|| stem.strip_prefix("Decaying"))
        .unwrap_or(stem);
    PARTICLE_STEMS.iter().any(|species| {
        rest.strip_prefix(species).is_some_and(|digits| digits.chars().all(|c| c.is_ascii_digit()))
    })
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_calls_are_not_free() {
        let s = ExprSymbols::scan("locBeamP4.E() > 8.2 && dComboWrapper->Get_ChiSq() < 5").unwrap();
        assert_eq!(s.identifiers, vec!["locBeamP4", "dComboWrapper"]);
    }

    #[test]
    fn literals_and_numbers_are_skipped() {
        let s = ExprSymbols::scan(r#"fabs(locDeltaT_RF) > 0.5 * 4.008e+0 && name != "locFake""#)
            .unwrap();
        assert_eq!(s.identifiers, vec!["fabs", "locDeltaT_RF", "name"]);
    }

    #[test]
    fn scoped_names_skip_member_part() {
        let s = ExprSymbols::scan("TMath::Abs(x) + .5f").unwrap();
        assert_eq!(s.identifiers, vec!["TMath", "x"]);
    }

    #[test]
    fn unterminated_literal_is_error() {
        assert!(ExprSymbols::scan("\"open").is_err());
    }

    #[test]
    fn rename_preserves_layout() {
        let out = rename_identifiers("locBeamP4 + locProtonP4.Vect()", |name| {
            (name != "Vect").then(|| format!("{name}_COM"))
        })
        .unwrap();
        assert_eq!(out, "locBeamP4_COM + locProtonP4_COM.Vect()");
    }

    #[test]
    fn role_accessor_strips_frame_suffix() {
        let frames = vec!["COM".to_string()];
        let acc = role_accessor("locPiPlus1P4_Measured_COM", &frames).unwrap();
        assert_eq!(acc.stem, "PiPlus1");
        assert_eq!(acc.accessor, "P4_Measured");
        assert_eq!(role_accessor("locPhoton2NeutralID", &[]).unwrap().stem, "Photon2");
        assert!(role_accessor("locWeight", &[]).is_none());
        assert!(role_accessor("dTargetP4", &[]).is_none());
    }

    #[test]
    fn particle_slot_shapes() {
        assert!(looks_like_particle_slot("PiPlus2"));
        assert!(looks_like_particle_slot("MissingProton"));
        assert!(looks_like_particle_slot("DecayingPi0"));
        assert!(looks_like_particle_slot("Beam"));
        assert!(!looks_like_particle_slot("PiPlusPiMinus"));
        assert!(!looks_like_particle_slot("Missing"));
    }
}
