//! Line-oriented org outline library: heading trees with tags, TODO
//! keywords, and timestamp values carrying repeater/warning cookies.
//! The grammar layer classifies single lines; the parser folds a line
//! stream into a document tree; formatting renders the tree back out.

pub mod core {
    use chrono::{Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
    use serde::{Deserialize, Serialize};
    use std::fmt;

    use crate::grammar::{OrgGrammar, TimestampMatch};

    /* ------------------------------- Errors ------------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum OrgError {
        #[error("body lines must not contain a line terminator")]
        EmbeddedNewline,
        #[error("title may not contain a newline")]
        NewlineInTitle,
        #[error("parent level {parent} must be less than child level {child}")]
        InvalidParent { parent: u16, child: u16 },
        #[error("timestamp has no repeater to advance")]
        NoRepeater,
    }

    /* ----------------------------- Timestamps ----------------------------- */

    /// Calendar units a repeater or warning cookie can count in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeatUnit {
        Hour,
        Day,
        Week,
        Month,
        Year,
    }

    impl RepeatUnit {
        pub fn symbol(self) -> char {
            match self {
                RepeatUnit::Hour => 'h',
                RepeatUnit::Day => 'd',
                RepeatUnit::Week => 'w',
                RepeatUnit::Month => 'm',
                RepeatUnit::Year => 'y',
            }
        }

        pub fn from_symbol(c: char) -> Option<Self> {
            match c {
                'h' => Some(RepeatUnit::Hour),
                'd' => Some(RepeatUnit::Day),
                'w' => Some(RepeatUnit::Week),
                'm' => Some(RepeatUnit::Month),
                'y' => Some(RepeatUnit::Year),
                _ => None,
            }
        }
    }

    /// `+` steps from the stored value, `++` steps until strictly past
    /// now keeping phase, `.+` re-anchors to now and then steps once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeaterKind {
        Simple,
        CatchUp,
        Restart,
    }

    impl RepeaterKind {
        pub fn symbol(self) -> &'static str {
            match self {
                RepeaterKind::Simple => "+",
                RepeaterKind::CatchUp => "++",
                RepeaterKind::Restart => ".+",
            }
        }
    }

    /// Repeater cookie such as `+1w`, `++4d`, `.+1m`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Repeater {
        pub kind: RepeaterKind,
        pub amount: u32,
        pub unit: RepeatUnit,
    }

    impl fmt::Display for Repeater {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}{}{}", self.kind.symbol(), self.amount, self.unit.symbol())
        }
    }

    /// Advance-notice cookie such as `-2d`. Carried through parsing and
    /// rendering; [`OrgTimestamp::warning_time`] derives the notification
    /// instant from it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Warning {
        pub amount: u32,
        pub unit: RepeatUnit,
    }

    impl fmt::Display for Warning {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "-{}{}", self.amount, self.unit.symbol())
        }
    }

    /// A single `<...>` timestamp: date, optional time and same-day end
    /// time, optional repeater and warning cookies.
    ///
    /// The day-of-week label is never stored. It is recomputed from the
    /// date on every render, so a wrong label in the input self-heals.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrgTimestamp {
        pub date: NaiveDate,
        pub time: Option<NaiveTime>,
        /// End of a same-day time span; only meaningful when `time` is set.
        pub end_time: Option<NaiveTime>,
        pub repeater: Option<Repeater>,
        pub warning: Option<Warning>,
    }

    impl OrgTimestamp {
        pub fn date_only(date: NaiveDate) -> Self {
            Self {
                date,
                time: None,
                end_time: None,
                repeater: None,
                warning: None,
            }
        }

        pub fn with_time(date: NaiveDate, time: NaiveTime) -> Self {
            Self {
                time: Some(time),
                ..Self::date_only(date)
            }
        }

        /// Date plus start time, midnight for date-only values.
        pub fn datetime(&self) -> NaiveDateTime {
            let time = self.time.unwrap_or_else(|| {
                NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is a valid time")
            });
            self.date.and_time(time)
        }

        /// The instant advance notice should fire: the timestamp minus
        /// the warning offset. `None` when no warning cookie is set.
        pub fn warning_time(&self) -> Option<NaiveDateTime> {
            let warning = self.warning?;
            let dt = self.datetime();
            Some(match warning.unit {
                RepeatUnit::Hour => dt - Duration::hours(warning.amount as i64),
                RepeatUnit::Day => dt - Duration::days(warning.amount as i64),
                RepeatUnit::Week => dt - Duration::weeks(warning.amount as i64),
                RepeatUnit::Month => sub_months(dt, warning.amount),
                RepeatUnit::Year => sub_months(dt, warning.amount * 12),
            })
        }

        /// Advance to the next occurrence per the repeater kind, against
        /// the real wall clock. Errors when no repeater is set.
        pub fn to_next_repeat(&mut self) -> Result<(), OrgError> {
            self.advance_repeat_from(Local::now().naive_local())
        }

        /// Deterministic variant of [`to_next_repeat`](Self::to_next_repeat)
        /// with an injected "now".
        pub fn advance_repeat_from(&mut self, now: NaiveDateTime) -> Result<(), OrgError> {
            let rep = self.repeater.ok_or(OrgError::NoRepeater)?;
            match rep.kind {
                RepeaterKind::Simple => self.step(rep.amount, rep.unit),
                RepeaterKind::CatchUp => {
                    self.step(rep.amount, rep.unit);
                    // A zero amount would never make progress.
                    while rep.amount > 0 && self.datetime() <= now {
                        self.step(rep.amount, rep.unit);
                    }
                }
                RepeaterKind::Restart => match rep.unit {
                    RepeatUnit::Hour => {
                        // Keep the stored minute, re-anchor to the current hour.
                        let minute = self.time.map(|t| t.minute()).unwrap_or(0);
                        let base = now
                            .date()
                            .and_hms_opt(now.hour(), minute, 0)
                            .expect("hour and minute are in range");
                        let next = base + Duration::hours(rep.amount as i64);
                        self.date = next.date();
                        self.time = Some(next.time());
                    }
                    _ => {
                        // Keep the stored time of day, re-anchor the date to today.
                        self.date = now.date();
                        self.step(rep.amount, rep.unit);
                    }
                },
            }
            Ok(())
        }

        /// One plain step of `amount` units, calendar-correct: months and
        /// years clamp the day into the target month, hours roll the date
        /// over midnight.
        fn step(&mut self, amount: u32, unit: RepeatUnit) {
            match unit {
                RepeatUnit::Hour => {
                    let next = self.datetime() + Duration::hours(amount as i64);
                    self.date = next.date();
                    self.time = Some(next.time());
                }
                RepeatUnit::Day => self.date = self.date + Duration::days(amount as i64),
                RepeatUnit::Week => self.date = self.date + Duration::weeks(amount as i64),
                RepeatUnit::Month => {
                    self.date = self
                        .date
                        .checked_add_months(Months::new(amount))
                        .expect("date stays in chrono's supported range");
                }
                RepeatUnit::Year => {
                    self.date = self
                        .date
                        .checked_add_months(Months::new(amount * 12))
                        .expect("date stays in chrono's supported range");
                }
            }
        }

        /// Bracket contents without the surrounding `<` `>`. Time fields
        /// are skipped when `show_time` is false; ranges use this to share
        /// time presence across both halves.
        pub(crate) fn render_fields(&self, show_time: bool) -> String {
            let mut out = format!("{} {}", self.date.format("%Y-%m-%d"), self.date.format("%a"));
            if show_time {
                if let Some(time) = self.time {
                    out.push(' ');
                    out.push_str(&time.format("%H:%M").to_string());
                    if let Some(end) = self.end_time {
                        out.push('-');
                        out.push_str(&end.format("%H:%M").to_string());
                    }
                }
            }
            if let Some(rep) = &self.repeater {
                out.push(' ');
                out.push_str(&rep.to_string());
            }
            if let Some(warning) = &self.warning {
                out.push(' ');
                out.push_str(&warning.to_string());
            }
            out
        }
    }

    impl fmt::Display for OrgTimestamp {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "<{}>", self.render_fields(true))
        }
    }

    impl From<TimestampMatch<'_>> for OrgTimestamp {
        fn from(m: TimestampMatch<'_>) -> Self {
            // The captured day label is cosmetic and dropped here.
            Self {
                date: m.date,
                time: m.time,
                end_time: m.end_time,
                repeater: m.repeater,
                warning: m.warning,
            }
        }
    }

    fn sub_months(dt: NaiveDateTime, months: u32) -> NaiveDateTime {
        let date = dt
            .date()
            .checked_sub_months(Months::new(months))
            .expect("date stays in chrono's supported range");
        date.and_time(dt.time())
    }

    /* --------------------------- Timestamp ranges --------------------------- */

    /// `<start>--<end>`. Both halves are stored as parsed; serialization
    /// shares time presence: times render only when both halves carry
    /// one, and the end date is always written out even when it equals
    /// the start date.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrgTimestampRange {
        pub start: OrgTimestamp,
        pub end: OrgTimestamp,
    }

    impl OrgTimestampRange {
        pub fn new(start: OrgTimestamp, end: OrgTimestamp) -> Self {
            Self { start, end }
        }

        pub fn from_matches(start: TimestampMatch<'_>, end: TimestampMatch<'_>) -> Self {
            Self::new(start.into(), end.into())
        }
    }

    impl fmt::Display for OrgTimestampRange {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let show_time = self.start.time.is_some() && self.end.time.is_some();
            write!(
                f,
                "<{}>--<{}>",
                self.start.render_fields(show_time),
                self.end.render_fields(show_time)
            )
        }
    }

    /* ------------------------------ Tree nodes ------------------------------ */

    /// Index of a node inside its owning [`OrgDocument`]. The parent link
    /// is one of these rather than an owning edge, so the tree carries no
    /// ownership cycles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NodeId(pub usize);

    /// A heading entry: level (star count), optional TODO keyword, title,
    /// own tags, leading comments, body text, and the timestamps and
    /// ranges lifted out of the body. Level 0 is reserved for the
    /// document root, which renders no heading line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrgNode {
        pub level: u16,
        pub todo: Option<String>,
        title: String,
        pub tags: Vec<String>,
        pub comments: String,
        pub body: String,
        pub timestamps: Vec<OrgTimestamp>,
        pub ranges: Vec<OrgTimestampRange>,
        children: Vec<NodeId>,
        parent: Option<NodeId>,
    }

    impl OrgNode {
        pub fn new(level: u16) -> Self {
            Self {
                level,
                todo: None,
                title: String::new(),
                tags: Vec::new(),
                comments: String::new(),
                body: String::new(),
                timestamps: Vec::new(),
                ranges: Vec::new(),
                children: Vec::new(),
                parent: None,
            }
        }

        pub fn title(&self) -> &str {
            &self.title
        }

        pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), OrgError> {
            let title = title.into();
            if title.contains('\n') || title.contains('\r') {
                return Err(OrgError::NewlineInTitle);
            }
            self.title = title;
            Ok(())
        }

        /// Append tags to this node's own tag list. Inherited tags are
        /// resolved by [`OrgDocument::all_tags`].
        pub fn add_tags<I, S>(&mut self, tags: I)
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.tags.extend(tags.into_iter().map(Into::into));
        }

        pub fn add_timestamp(&mut self, ts: OrgTimestamp) {
            self.timestamps.push(ts);
        }

        pub fn add_timestamp_range(&mut self, range: OrgTimestampRange) {
            self.ranges.push(range);
        }

        pub fn children(&self) -> &[NodeId] {
            &self.children
        }

        pub fn parent(&self) -> Option<NodeId> {
            self.parent
        }

        /// Ingest one body line (without its line terminator). While the
        /// accumulated body is still blank, comment lines accumulate into
        /// `comments` and timestamp / range lines are lifted into their
        /// own lists, discarding any blank lines that preceded them. From
        /// the first substantive line on, everything is appended verbatim.
        ///
        /// The metadata window is derived from the body content itself,
        /// so it survives cloning and serde round trips.
        pub fn add_body_line(&mut self, line: &str, grammar: &OrgGrammar) -> Result<(), OrgError> {
            if line.contains('\n') || line.contains('\r') {
                return Err(OrgError::EmbeddedNewline);
            }
            if self.body.trim().is_empty() {
                if grammar.is_comment(line) {
                    self.comments.push_str(line);
                    self.comments.push('\n');
                    self.body.clear();
                    return Ok(());
                }
                if let Some(m) = grammar.timestamp(line) {
                    self.body.clear();
                    self.timestamps.push(m.into());
                    return Ok(());
                }
                if let Some((start, end)) = grammar.timestamp_range(line) {
                    self.body.clear();
                    self.ranges.push(OrgTimestampRange::from_matches(start, end));
                    return Ok(());
                }
            }
            self.body.push_str(line);
            self.body.push('\n');
            Ok(())
        }
    }

    /* ------------------------------ Document ------------------------------ */

    /// Arena-owned heading tree. Node 0 is the level-0 root; all other
    /// nodes hang off it via `parent`/`children` index links.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrgDocument {
        nodes: Vec<OrgNode>,
    }

    impl OrgDocument {
        pub const ROOT: NodeId = NodeId(0);

        pub fn new() -> Self {
            Self {
                nodes: vec![OrgNode::new(0)],
            }
        }

        pub fn node(&self, id: NodeId) -> &OrgNode {
            &self.nodes[id.0]
        }

        pub fn node_mut(&mut self, id: NodeId) -> &mut OrgNode {
            &mut self.nodes[id.0]
        }

        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            // The root always exists.
            self.nodes.len() <= 1
        }

        /// Add a detached node; attach it with [`set_parent`](Self::set_parent).
        pub fn push_node(&mut self, node: OrgNode) -> NodeId {
            let id = NodeId(self.nodes.len());
            self.nodes.push(node);
            id
        }

        /// Attach `child` under `parent`, positionally. The parent's
        /// level must be strictly less than the child's; the check runs
        /// before any mutation so a failed call changes nothing.
        pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), OrgError> {
            let parent_level = self.nodes[parent.0].level;
            let child_level = self.nodes[child.0].level;
            if parent_level >= child_level {
                return Err(OrgError::InvalidParent {
                    parent: parent_level,
                    child: child_level,
                });
            }
            if let Some(old) = self.nodes[child.0].parent {
                self.nodes[old.0].children.retain(|&c| c != child);
            }
            self.nodes[child.0].parent = Some(parent);
            self.nodes[parent.0].children.push(child);
            Ok(())
        }

        /// This node's own tags followed by each ancestor's, nearest
        /// ancestor first. Duplicates are kept.
        pub fn all_tags(&self, id: NodeId) -> Vec<String> {
            let mut out = self.nodes[id.0].tags.clone();
            let mut cursor = self.nodes[id.0].parent;
            while let Some(ancestor) = cursor {
                out.extend(self.nodes[ancestor.0].tags.iter().cloned());
                cursor = self.nodes[ancestor.0].parent;
            }
            out
        }
    }

    impl Default for OrgDocument {
        fn default() -> Self {
            Self::new()
        }
    }

}

pub mod grammar {
    //! Stateless single-line recognizers built on `nom`. Every recognizer
    //! returns `Option`: a line that does not match is ordinary body
    //! text, not an error. Matches expose named fields instead of
    //! positional capture groups.

    use chrono::{NaiveDate, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while, take_while1},
        character::complete::{anychar, char, digit1, space0, space1},
        combinator::{map, map_res, opt},
        error::{VerboseError, VerboseErrorKind},
        sequence::{delimited, preceded, terminated, tuple},
    };

    use crate::core::{RepeatUnit, Repeater, RepeaterKind, Warning};

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Named fields of a matched heading line.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HeadingMatch<'a> {
        /// Number of leading heading markers; doubles as the node level.
        pub stars: usize,
        pub todo: Option<&'a str>,
        pub title: &'a str,
        /// Own tags from the trailing `:a:b:` block, in order.
        pub tags: Vec<&'a str>,
    }

    /// Named fields of a matched timestamp bracket. The day label is
    /// captured for completeness, but consumers recompute it from the
    /// date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimestampMatch<'a> {
        pub date: NaiveDate,
        pub day: Option<&'a str>,
        pub time: Option<NaiveTime>,
        pub end_time: Option<NaiveTime>,
        pub repeater: Option<Repeater>,
        pub warning: Option<Warning>,
    }

    /// Line grammar configuration: the TODO keyword vocabulary and the
    /// comment marker. An empty vocabulary falls back to the broad
    /// heuristic where any leading all-caps word after the stars counts
    /// as a TODO keyword.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct OrgGrammar {
        todo_keywords: Vec<String>,
        comment_marker: String,
    }

    impl Default for OrgGrammar {
        fn default() -> Self {
            Self {
                todo_keywords: Vec::new(),
                comment_marker: "#".to_string(),
            }
        }
    }

    impl OrgGrammar {
        pub fn new() -> Self {
            Self::default()
        }

        /// Restrict TODO recognition to an explicit vocabulary.
        pub fn with_todo_keywords<I, S>(mut self, keywords: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.todo_keywords = keywords.into_iter().map(Into::into).collect();
            self
        }

        pub fn with_comment_marker(mut self, marker: impl Into<String>) -> Self {
            self.comment_marker = marker.into();
            self
        }

        pub fn todo_keywords(&self) -> &[String] {
            &self.todo_keywords
        }

        /* ----------------------------- Headings ----------------------------- */

        /// Classify `line` as a heading: one or more `*` then a space, an
        /// optional TODO keyword, the title, and an optional trailing tag
        /// block.
        pub fn heading<'a>(&self, line: &'a str) -> Option<HeadingMatch<'a>> {
            let stars = line.chars().take_while(|&c| c == '*').count();
            if stars == 0 {
                return None;
            }
            let rest = line[stars..].strip_prefix(' ')?;
            let rest = rest.trim_start_matches(' ');

            let (rest, todo) = self.take_todo(rest);
            let (title, tags) = split_tag_block(rest.trim_end());
            Some(HeadingMatch {
                stars,
                todo,
                title,
                tags,
            })
        }

        /// Take a TODO keyword off the front of the post-stars text. With
        /// an empty vocabulary any all-caps word followed by a space
        /// counts; otherwise only registered keywords match.
        fn take_todo<'a>(&self, i: &'a str) -> (&'a str, Option<&'a str>) {
            if self.todo_keywords.is_empty() {
                let end = i.find(' ').unwrap_or(i.len());
                let word = &i[..end];
                if !word.is_empty()
                    && end < i.len()
                    && word.chars().all(|c| c.is_ascii_uppercase())
                {
                    return (i[end..].trim_start_matches(' '), Some(word));
                }
            } else {
                for keyword in &self.todo_keywords {
                    if let Some(rest) = i.strip_prefix(keyword.as_str()) {
                        if rest.starts_with(' ') {
                            return (rest.trim_start_matches(' '), Some(&i[..keyword.len()]));
                        }
                    }
                }
            }
            (i, None)
        }

        /* ----------------------------- Comments ----------------------------- */

        pub fn is_comment(&self, line: &str) -> bool {
            line.trim_start().starts_with(self.comment_marker.as_str())
        }

        /* ---------------------------- Timestamps ---------------------------- */

        /// Classify `line` as a single timestamp line: optional
        /// whitespace, an optional `LABEL:` prefix (e.g. a scheduling
        /// label), one bracketed value, optional trailing whitespace,
        /// nothing else.
        pub fn timestamp<'a>(&self, line: &'a str) -> Option<TimestampMatch<'a>> {
            let (rest, m) = timestamp_line(line).ok()?;
            rest.is_empty().then_some(m)
        }

        /// Classify `line` as a timestamp range: two bracketed values
        /// joined by `--`.
        pub fn timestamp_range<'a>(
            &self,
            line: &'a str,
        ) -> Option<(TimestampMatch<'a>, TimestampMatch<'a>)> {
            let (rest, pair) = range_line(line).ok()?;
            rest.is_empty().then_some(pair)
        }
    }

    fn timestamp_line(i: &str) -> PResult<'_, TimestampMatch<'_>> {
        let (i, _) = space0(i)?;
        let (i, _label) = opt(terminated(label_token, space0))(i)?;
        let (i, m) = bracketed(i)?;
        let (i, _) = space0(i)?;
        Ok((i, m))
    }

    fn range_line(i: &str) -> PResult<'_, (TimestampMatch<'_>, TimestampMatch<'_>)> {
        let (i, _) = space0(i)?;
        let (i, start) = bracketed(i)?;
        let (i, _) = tag("--")(i)?;
        let (i, end) = bracketed(i)?;
        let (i, _) = space0(i)?;
        Ok((i, (start, end)))
    }

    fn label_token(i: &str) -> PResult<'_, &str> {
        terminated(
            take_while1(|c: char| c.is_ascii_uppercase() || c == '_'),
            char(':'),
        )(i)
    }

    fn bracketed(i: &str) -> PResult<'_, TimestampMatch<'_>> {
        delimited(char('<'), timestamp_fields, char('>'))(i)
    }

    fn timestamp_fields(i: &str) -> PResult<'_, TimestampMatch<'_>> {
        let (i, date) = date(i)?;
        let (i, day) = opt(preceded(space1, day_name))(i)?;
        let (i, time) = opt(preceded(space1, clock))(i)?;
        let (i, end_time) = if time.is_some() {
            opt(preceded(char('-'), clock))(i)?
        } else {
            (i, None)
        };
        let (i, repeater) = opt(preceded(space1, repeater))(i)?;
        let (i, warning) = opt(preceded(space1, warning))(i)?;
        Ok((
            i,
            TimestampMatch {
                date,
                day,
                time,
                end_time,
                repeater,
                warning,
            },
        ))
    }

    fn date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(digits(4, 4), |s: &str| s.parse::<i32>()),
                char('-'),
                map_res(digits(2, 2), |s: &str| s.parse::<u32>()),
                char('-'),
                map_res(digits(2, 2), |s: &str| s.parse::<u32>()),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn clock(i: &str) -> PResult<'_, NaiveTime> {
        map_res(
            tuple((
                map_res(digits(1, 2), |s: &str| s.parse::<u32>()),
                char(':'),
                map_res(digits(2, 2), |s: &str| s.parse::<u32>()),
            )),
            |(h, _, m)| NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time"),
        )(i)
    }

    fn day_name(i: &str) -> PResult<'_, &str> {
        take_while1(|c: char| c.is_alphabetic())(i)
    }

    fn repeater(i: &str) -> PResult<'_, Repeater> {
        let (i, kind) = alt((
            map(tag(".+"), |_| RepeaterKind::Restart),
            map(tag("++"), |_| RepeaterKind::CatchUp),
            map(tag("+"), |_| RepeaterKind::Simple),
        ))(i)?;
        let (i, amount) = map_res(digit1, |s: &str| s.parse::<u32>())(i)?;
        let (i, unit) = unit(i)?;
        Ok((i, Repeater { kind, amount, unit }))
    }

    fn warning(i: &str) -> PResult<'_, Warning> {
        let (i, _) = char('-')(i)?;
        let (i, amount) = map_res(digit1, |s: &str| s.parse::<u32>())(i)?;
        let (i, unit) = unit(i)?;
        Ok((i, Warning { amount, unit }))
    }

    fn unit(i: &str) -> PResult<'_, RepeatUnit> {
        let (rest, c) = anychar(i)?;
        match RepeatUnit::from_symbol(c) {
            Some(u) => Ok((rest, u)),
            None => Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context("repeat unit"))],
            })),
        }
    }

    fn digits(min: usize, max: usize) -> impl Fn(&str) -> IResult<&str, &str, VerboseError<&str>> {
        move |i: &str| {
            let (rest, out) = take_while(|c: char| c.is_ascii_digit())(i)?;
            if out.len() < min || out.len() > max {
                Err(nom::Err::Error(VerboseError {
                    errors: vec![(i, VerboseErrorKind::Context("digit run"))],
                }))
            } else {
                Ok((rest, out))
            }
        }
    }

    /// Split a trailing `:a:b:` tag block off the title, if present.
    /// Empty tokens from doubled colons are discarded.
    fn split_tag_block(s: &str) -> (&str, Vec<&str>) {
        if let Some(pos) = s.rfind(' ') {
            let candidate = &s[pos + 1..];
            if candidate.len() > 2 && candidate.starts_with(':') && candidate.ends_with(':') {
                let tags: Vec<&str> = candidate.split(':').filter(|t| !t.is_empty()).collect();
                if !tags.is_empty() {
                    return (s[..pos].trim_end(), tags);
                }
            }
        }
        (s, Vec::new())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::{NaiveDate, NaiveTime};

        fn d(y: i32, m: u32, day: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, day).unwrap()
        }

        fn t(h: u32, m: u32) -> NaiveTime {
            NaiveTime::from_hms_opt(h, m, 0).unwrap()
        }

        #[test]
        fn heading_extracts_stars_title_and_tags() {
            let g = OrgGrammar::new().with_todo_keywords(["TODO"]);
            let m = g.heading("*** A simple title :bob:alice:").unwrap();
            assert_eq!(m.stars, 3);
            assert_eq!(m.todo, None);
            assert_eq!(m.title, "A simple title");
            assert_eq!(m.tags, ["bob", "alice"]);
        }

        #[test]
        fn heuristic_vocabulary_takes_any_caps_word() {
            let g = OrgGrammar::new();
            let m = g.heading("* BOB A simple title :bob:alice:").unwrap();
            assert_eq!(m.todo, Some("BOB"));
            assert_eq!(m.title, "A simple title");
            assert_eq!(m.tags, ["bob", "alice"]);
        }

        #[test]
        fn explicit_vocabulary_is_exclusive() {
            let g = OrgGrammar::new().with_todo_keywords(["BOB"]);
            let m = g.heading("* BOB A simple title :bob:alice:").unwrap();
            assert_eq!(m.todo, Some("BOB"));
            assert_eq!(m.title, "A simple title");

            let g = OrgGrammar::new().with_todo_keywords(["TODO", "DONE"]);
            let m = g.heading("* BOB A simple title :bob:alice:").unwrap();
            assert_eq!(m.todo, None);
            assert_eq!(m.title, "BOB A simple title");
        }

        #[test]
        fn heading_requires_stars_then_space() {
            let g = OrgGrammar::new();
            assert!(g.heading("*no space").is_none());
            assert!(g.heading("no stars at all").is_none());
            assert!(g.heading(" * indented").is_none());
        }

        #[test]
        fn tag_block_discards_empty_tokens() {
            let g = OrgGrammar::new().with_todo_keywords(["TODO"]);
            let m = g.heading("* Title :a::b:").unwrap();
            assert_eq!(m.tags, ["a", "b"]);
            // A colon-free trailing word is part of the title.
            let m = g.heading("* Title ratio 1:2").unwrap();
            assert_eq!(m.title, "Title ratio 1:2");
            assert!(m.tags.is_empty());
        }

        #[test]
        fn timestamp_full_fields() {
            let g = OrgGrammar::new();
            let m = g.timestamp("<2013-12-31 Tue 12:21-14:59 ++1w -2d>").unwrap();
            assert_eq!(m.date, d(2013, 12, 31));
            assert_eq!(m.day, Some("Tue"));
            assert_eq!(m.time, Some(t(12, 21)));
            assert_eq!(m.end_time, Some(t(14, 59)));
            assert_eq!(
                m.repeater,
                Some(Repeater {
                    kind: RepeaterKind::CatchUp,
                    amount: 1,
                    unit: RepeatUnit::Week,
                })
            );
            assert_eq!(
                m.warning,
                Some(Warning {
                    amount: 2,
                    unit: RepeatUnit::Day,
                })
            );
        }

        #[test]
        fn timestamp_with_label_and_padding() {
            let g = OrgGrammar::new();
            let m = g
                .timestamp("SCHEDULED: <2013-12-31 Tue 12:21-14:59 ++1w -2d>")
                .unwrap();
            assert_eq!(m.date, d(2013, 12, 31));
            assert_eq!(m.repeater.map(|r| r.kind), Some(RepeaterKind::CatchUp));

            let m = g.timestamp("  <2013-12-31 12:30 -1d>  ").unwrap();
            assert_eq!(m.date, d(2013, 12, 31));
            assert_eq!(m.day, None);
            assert_eq!(m.time, Some(t(12, 30)));
            assert_eq!(m.end_time, None);
            assert_eq!(m.repeater, None);
            assert_eq!(m.warning.map(|w| w.amount), Some(1));
        }

        #[test]
        fn timestamp_minimum_leaves_options_absent() {
            let m = OrgGrammar::new().timestamp("<2013-12-31>").unwrap();
            assert_eq!(m.date, d(2013, 12, 31));
            assert_eq!(m.day, None);
            assert_eq!(m.time, None);
            assert_eq!(m.end_time, None);
            assert_eq!(m.repeater, None);
            assert_eq!(m.warning, None);
        }

        #[test]
        fn timestamp_rejects_non_matches() {
            let g = OrgGrammar::new();
            assert!(g.timestamp("plain body text").is_none());
            assert!(g.timestamp("<2013-12>").is_none());
            assert!(g.timestamp("<2013-13-40>").is_none());
            assert!(g.timestamp("before <2013-12-31>").is_none());
            assert!(g.timestamp("<2013-12-31> after").is_none());
            // A range is not a single timestamp.
            assert!(g.timestamp("<2013-12-31>--<2014-02-28>").is_none());
        }

        #[test]
        fn repeater_kind_symbols_are_disambiguated() {
            let g = OrgGrammar::new();
            let kinds = [
                ("<2013-12-31 +1w>", RepeaterKind::Simple),
                ("<2013-12-31 ++1w>", RepeaterKind::CatchUp),
                ("<2013-12-31 .+1w>", RepeaterKind::Restart),
            ];
            for (line, kind) in kinds {
                let m = g.timestamp(line).unwrap();
                assert_eq!(m.repeater.map(|r| r.kind), Some(kind), "{line}");
            }
        }

        #[test]
        fn range_extracts_both_halves() {
            let g = OrgGrammar::new();
            let (s, e) = g
                .timestamp_range("<2013-12-31 Tue 12:21>--<2014-02-28 Wed 19:21>")
                .unwrap();
            assert_eq!(s.date, d(2013, 12, 31));
            assert_eq!(s.day, Some("Tue"));
            assert_eq!(s.time, Some(t(12, 21)));
            assert_eq!(e.date, d(2014, 2, 28));
            assert_eq!(e.day, Some("Wed"));
            assert_eq!(e.time, Some(t(19, 21)));

            let (s, e) = g.timestamp_range("<2013-12-31>--<2014-02-28>").unwrap();
            assert_eq!(s.date, d(2013, 12, 31));
            assert_eq!(s.time, None);
            assert_eq!(e.date, d(2014, 2, 28));
            assert_eq!(e.time, None);
        }

        #[test]
        fn range_requires_double_dash_joint() {
            let g = OrgGrammar::new();
            assert!(g.timestamp_range("<2013-12-31>-<2014-02-28>").is_none());
            assert!(g.timestamp_range("<2013-12-31>").is_none());
        }

        #[test]
        fn comment_marker_is_configurable() {
            let g = OrgGrammar::new();
            assert!(g.is_comment("# a comment"));
            assert!(g.is_comment("  # indented"));
            assert!(!g.is_comment("not # a comment"));

            let g = OrgGrammar::new().with_comment_marker(";;");
            assert!(g.is_comment(";; lispish"));
            assert!(!g.is_comment("# orgish"));
        }
    }
}

pub mod parser {
    //! Folds a stream of terminator-free lines into an [`OrgDocument`].
    //! Heading lines open new nodes, attached under the nearest shallower
    //! node on a cursor stack; everything else feeds the current node's
    //! body ingestion.

    use crate::core::{NodeId, OrgDocument, OrgError, OrgNode};
    use crate::grammar::OrgGrammar;

    /// Assemble a document from lines. Lines must not carry their
    /// terminator (as produced by `str::lines` or `BufRead::lines`).
    pub fn parse_document<'a, I>(grammar: &OrgGrammar, lines: I) -> Result<OrgDocument, OrgError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut doc = OrgDocument::new();
        // Stack of open nodes, root first; the last entry receives body lines.
        let mut cursor: Vec<NodeId> = vec![OrgDocument::ROOT];

        for line in lines {
            if let Some(m) = grammar.heading(line) {
                let mut node = OrgNode::new(m.stars as u16);
                node.todo = m.todo.map(str::to_string);
                node.set_title(m.title)?;
                node.add_tags(m.tags.iter().copied());
                let id = doc.push_node(node);

                while doc.node(*cursor.last().expect("root stays on the stack")).level
                    >= m.stars as u16
                {
                    cursor.pop();
                }
                let parent = *cursor.last().expect("root stays on the stack");
                doc.set_parent(id, parent)?;
                cursor.push(id);
            } else {
                let current = *cursor.last().expect("root stays on the stack");
                doc.node_mut(current).add_body_line(line, grammar)?;
            }
        }

        Ok(doc)
    }

    /// Convenience wrapper splitting `text` on line terminators.
    pub fn parse_str(grammar: &OrgGrammar, text: &str) -> Result<OrgDocument, OrgError> {
        parse_document(grammar, text.lines())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{NodeId, OrgDocument};
        use crate::format::render_document;
        use chrono::NaiveDate;

        fn doc(text: &str) -> OrgDocument {
            parse_str(&OrgGrammar::new().with_todo_keywords(["TODO", "DONE"]), text)
                .expect("parse")
        }

        #[test]
        fn builds_a_nested_tree() {
            let d = doc(concat!(
                "preamble\n",
                "* Top :a:\n",
                "top body\n",
                "** TODO Child :b:\n",
                "<2013-01-01>\n",
                "child body\n",
                "* Second\n",
            ));

            let root = d.node(OrgDocument::ROOT);
            assert_eq!(root.body, "preamble\n");
            assert_eq!(root.children().len(), 2);

            let top = d.node(root.children()[0]);
            assert_eq!(top.level, 1);
            assert_eq!(top.title(), "Top");
            assert_eq!(top.tags, ["a"]);
            assert_eq!(top.body, "top body\n");

            let child = d.node(top.children()[0]);
            assert_eq!(child.level, 2);
            assert_eq!(child.todo.as_deref(), Some("TODO"));
            assert_eq!(
                child.timestamps[0].date,
                NaiveDate::from_ymd_opt(2013, 1, 1).unwrap()
            );
            assert_eq!(child.body, "child body\n");
            assert_eq!(d.all_tags(root.children()[0]), ["a"]);
            assert_eq!(d.all_tags(top.children()[0]), ["b", "a"]);

            let second = d.node(root.children()[1]);
            assert_eq!(second.title(), "Second");
            assert!(second.children().is_empty());
        }

        #[test]
        fn level_jumps_attach_to_the_nearest_shallower_node() {
            let d = doc("* A\n*** Deep\n** Back\n");
            let root = d.node(OrgDocument::ROOT);
            let a = d.node(root.children()[0]);
            assert_eq!(a.children().len(), 2);
            assert_eq!(d.node(a.children()[0]).title(), "Deep");
            assert_eq!(d.node(a.children()[0]).level, 3);
            assert_eq!(d.node(a.children()[1]).title(), "Back");
            assert_eq!(d.node(a.children()[1]).level, 2);
        }

        #[test]
        fn render_then_reparse_is_equivalent() {
            let input = concat!(
                "# a file comment\n",
                "* TODO Top :a:b:\n",
                "SCHEDULED: <2013-12-31 Tue 12:30 +1w>\n",
                "body line one\n",
                "body line two\n",
                "** DONE Child\n",
                "<2013-12-31 Tue>--<2014-02-28 Fri>\n",
                "child body\n",
            );
            let grammar = OrgGrammar::new().with_todo_keywords(["TODO", "DONE"]);
            let first = parse_str(&grammar, input).expect("first parse");
            let rendered = render_document(&first);
            let second = parse_str(&grammar, &rendered).expect("reparse");

            assert_eq!(first.len(), second.len());
            for idx in 0..first.len() {
                let (a, b) = (first.node(NodeId(idx)), second.node(NodeId(idx)));
                assert_eq!(a.level, b.level);
                assert_eq!(a.title(), b.title());
                assert_eq!(a.todo, b.todo);
                assert_eq!(a.tags, b.tags);
                assert_eq!(a.timestamps, b.timestamps);
                assert_eq!(a.ranges, b.ranges);
                assert_eq!(a.body.trim_end(), b.body.trim_end());
            }
            // A second render is a fixed point.
            assert_eq!(render_document(&second), rendered);
        }
    }
}

pub mod format {
    //! Renders nodes and whole trees back to org text: heading line, then
    //! comments, timestamps, ranges, and body, in that order; siblings
    //! are separated by exactly one blank line.

    use crate::core::{NodeId, OrgDocument, OrgNode};

    /// The heading line including its newline; empty for the level-0 root.
    pub fn render_header(node: &OrgNode) -> String {
        if node.level == 0 {
            return String::new();
        }
        let mut out = "*".repeat(node.level as usize);
        out.push(' ');
        if let Some(todo) = &node.todo {
            out.push_str(todo);
            out.push(' ');
        }
        out.push_str(node.title());
        if !node.tags.is_empty() {
            out.push_str(" :");
            for tag in &node.tags {
                out.push_str(tag);
                out.push(':');
            }
        }
        out.push('\n');
        out
    }

    /// One node without its children.
    pub fn render_node(node: &OrgNode) -> String {
        let mut out = render_header(node);
        out.push_str(&node.comments);
        for ts in &node.timestamps {
            out.push_str(&ts.to_string());
            out.push('\n');
        }
        for range in &node.ranges {
            out.push_str(&range.to_string());
            out.push('\n');
        }
        out.push_str(&node.body);
        out
    }

    /// Depth-first rendering of `id` and its subtree.
    pub fn render_tree(doc: &OrgDocument, id: NodeId) -> String {
        let mut out = String::new();
        render_tree_into(doc, id, &mut out);
        out
    }

    /// The whole document, root preamble first.
    pub fn render_document(doc: &OrgDocument) -> String {
        render_tree(doc, OrgDocument::ROOT)
    }

    fn render_tree_into(doc: &OrgDocument, id: NodeId, out: &mut String) {
        out.push_str(&render_node(doc.node(id)));
        for &child in doc.node(id).children() {
            // One blank line between siblings. Skipped when the output
            // already ends blank (or is empty), so re-rendering a parsed
            // rendering is a fixed point.
            if !out.is_empty() && !out.ends_with("\n\n") {
                out.push('\n');
            }
            render_tree_into(doc, child, out);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{OrgDocument, OrgNode};
        use crate::grammar::OrgGrammar;
        use crate::parser::parse_str;

        #[test]
        fn header_orders_todo_title_and_tags() {
            let mut node = OrgNode::new(2);
            node.todo = Some("TODO".into());
            node.set_title("A title").unwrap();
            node.add_tags(["x", "y"]);
            assert_eq!(render_header(&node), "** TODO A title :x:y:\n");
        }

        #[test]
        fn root_renders_no_heading_line() {
            let mut doc = OrgDocument::new();
            doc.node_mut(OrgDocument::ROOT).body = "just text\n".into();
            assert_eq!(render_document(&doc), "just text\n");
        }

        #[test]
        fn node_body_follows_comments_and_timestamps() {
            let g = OrgGrammar::new();
            let mut node = OrgNode::new(1);
            node.set_title("T").unwrap();
            node.add_body_line("# note", &g).unwrap();
            node.add_body_line("<2013-12-31>", &g).unwrap();
            node.add_body_line("<2013-12-31>--<2014-02-28>", &g).unwrap();
            node.add_body_line("body", &g).unwrap();
            assert_eq!(
                render_node(&node),
                "* T\n# note\n<2013-12-31 Tue>\n<2013-12-31 Tue>--<2014-02-28 Fri>\nbody\n"
            );
        }

        #[test]
        fn siblings_are_separated_by_one_blank_line() {
            let g = OrgGrammar::new().with_todo_keywords(["TODO"]);
            let doc = parse_str(&g, "* A\nbody a\n* B\n** C\n").expect("parse");
            assert_eq!(render_document(&doc), "* A\nbody a\n\n* B\n\n** C\n");
        }
    }
}

pub use crate::core::{
    NodeId, OrgDocument, OrgError, OrgNode, OrgTimestamp, OrgTimestampRange, RepeatUnit, Repeater,
    RepeaterKind, Warning,
};
pub use crate::format::render_document;
pub use crate::grammar::OrgGrammar;
pub use crate::parser::{parse_document, parse_str};
