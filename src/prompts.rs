use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Static bank of comedic prompts. Order is fixed; draws are uniform.
pub const PROMPT_BANK: &[&str] = &[
    "The worst possible name for a luxury perfume",
    "A rejected slogan for the national weather service",
    "The real reason dinosaurs went extinct",
    "Something you should never say during a job interview",
    "The title of the least inspiring TED talk ever given",
    "A terrible theme for a children's birthday party",
    "The worst thing to whisper to a stranger in an elevator",
    "An unhelpful tip for first-time skydivers",
    "The secret ingredient in grandma's famous casserole",
    "A sign you've chosen the wrong wedding venue",
    "The least reassuring thing a pilot can announce mid-flight",
    "What cats would say if they could leave online reviews",
    "A rejected flavor of sparkling water",
    "The worst opening line for a eulogy",
    "Something you don't want to hear from your dentist",
    "A little-known side effect of drinking too much coffee",
    "The title of a self-help book that helps nobody",
    "What aliens actually think of our radio broadcasts",
    "A bad time to start practicing the trombone",
    "The most disappointing prize inside a cereal box",
    "An inadvisable theme for a company retreat",
    "The first rule of the world's least exclusive club",
    "Something a fortune cookie should never say",
    "A surprising item on a medieval knight's packing list",
    "The worst possible sponsor for a marathon",
    "What your houseplants talk about while you're at work",
    "A rejected motto for the post office",
    "The least effective way to childproof a home",
    "Something you should never 3D print",
    "The worst feature to advertise on a dating profile",
    "A terrible name for a retirement home",
    "What robots dream about when they power down",
    "An unfortunate autocorrect in a message to your boss",
    "The most useless superpower imaginable",
    "A bad answer to 'where do you see yourself in five years?'",
    "The dark secret of the neighborhood bake sale",
    "Something that should never be sold in vending machines",
    "The real contents of Area 51",
    "A rejected event for the winter Olympics",
    "The worst text to receive right before your wedding",
];

/// Fallback text used when the bank is exhausted after exclusions, so
/// callers always receive `count` prompts.
fn fallback_prompt(n: usize) -> String {
    format!("Invent a new national holiday and its weirdest tradition #{}", n + 1)
}

/// Draw `count` distinct prompt texts uniformly at random, skipping any
/// text present in `exclude`. Short banks are padded with fallbacks.
pub fn draw(count: usize, exclude: &HashSet<String>) -> Vec<String> {
    let mut available: Vec<&str> = PROMPT_BANK
        .iter()
        .copied()
        .filter(|t| !exclude.contains(*t))
        .collect();

    let mut rng = rand::rng();
    available.shuffle(&mut rng);

    let mut drawn: Vec<String> = available
        .into_iter()
        .take(count)
        .map(|t| t.to_string())
        .collect();

    let mut n = 0;
    while drawn.len() < count {
        let candidate = fallback_prompt(n);
        if !exclude.contains(&candidate) && !drawn.contains(&candidate) {
            drawn.push(candidate);
        }
        n += 1;
    }

    drawn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_distinct() {
        let drawn = draw(5, &HashSet::new());
        assert_eq!(drawn.len(), 5);
        let unique: HashSet<_> = drawn.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_draw_respects_exclusions() {
        let exclude: HashSet<String> = PROMPT_BANK.iter().take(10).map(|t| t.to_string()).collect();
        let drawn = draw(8, &exclude);
        for text in &drawn {
            assert!(!exclude.contains(text));
        }
    }

    #[test]
    fn test_draw_pads_when_bank_exhausted() {
        let exclude: HashSet<String> = PROMPT_BANK.iter().map(|t| t.to_string()).collect();
        let drawn = draw(3, &exclude);
        assert_eq!(drawn.len(), 3);
        for text in &drawn {
            assert!(text.contains("national holiday"));
        }
    }

    #[test]
    fn test_draw_more_than_bank_size() {
        let drawn = draw(PROMPT_BANK.len() + 4, &HashSet::new());
        assert_eq!(drawn.len(), PROMPT_BANK.len() + 4);
        let unique: HashSet<_> = drawn.iter().collect();
        assert_eq!(unique.len(), drawn.len());
    }
}
