use crate::model::*;

/// Remove `to_remove` from `base`. Both inputs must be sorted by start and
/// internally non-overlapping.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_nothing() {
        let base = [Span::new(100, 200)];
        assert_eq!(subtract_intervals(&base, &[]), vec![Span::new(100, 200)]);
    }

    #[test]
    fn subtract_middle() {
        let base = [Span::new(100, 400)];
        let remove = [Span::new(200, 300)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 200), Span::new(300, 400)]
        );
    }

    #[test]
    fn subtract_adjacent_blocks() {
        let base = [Span::new(100, 400)];
        let remove = [Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), vec![Span::new(300, 400)]);
    }

    #[test]
    fn subtract_everything() {
        let base = [Span::new(100, 200)];
        let remove = [Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_outside_base_is_ignored() {
        let base = [Span::new(100, 200), Span::new(300, 400)];
        let remove = [Span::new(0, 50), Span::new(210, 290), Span::new(500, 600)];
        assert_eq!(subtract_intervals(&base, &remove), base.to_vec());
    }
}
