//! Closed set of syntax node tags
//!
//! Every kept rule and every alias in the shipped grammars maps to one
//! variant. Grammar text that introduces a node name outside this set is
//! rejected when the parser is built, so visitors can dispatch on a plain
//! enum instead of strings.

macro_rules! node_tags {
    ($($variant:ident => $name:literal,)+) => {
        /// Tag of a syntax node: the rule name or the alias of the matched alternative
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NodeTag {
            $($variant,)+
        }

        impl NodeTag {
            /// All tags, in declaration order
            pub const ALL: &'static [NodeTag] = &[$(NodeTag::$variant,)+];

            /// Grammar name of the tag
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(NodeTag::$variant => $name,)+
                }
            }

            /// Look a tag up by its grammar name
            pub fn from_name(name: &str) -> Option<NodeTag> {
                match name {
                    $($name => Some(NodeTag::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

node_tags! {
    // statements
    Start => "start",
    Stmt => "stmt",
    SelectStmt => "select_stmt",
    SelectCore => "select_core",
    CompoundOp => "compound_op",
    WithClause => "with_clause",
    Cte => "cte",
    SetQuantifier => "set_quantifier",
    ResultColumn => "result_column",
    Star => "star",
    TableStar => "table_star",
    ValuesClause => "values_clause",
    ValueRow => "value_row",
    Alias => "alias",

    // sources
    FromClause => "from_clause",
    JoinSource => "join_source",
    Join => "join",
    JoinOperator => "join_operator",
    JoinKind => "join_kind",
    JoinConstraint => "join_constraint",
    TableOrSubquery => "table_or_subquery",
    TableRef => "table_ref",
    Subquery => "subquery",
    NestedJoin => "nested_join",
    TableFunction => "table_function",
    TableBlock => "table_block",

    // clauses
    WhereClause => "where_clause",
    GroupBy => "group_by",
    WindowClause => "window_clause",
    WindowDef => "window_def",
    WindowSpec => "window_spec",
    PartitionBy => "partition_by",
    FrameSpec => "frame_spec",
    FrameBound => "frame_bound",
    OrderBy => "order_by",
    OrderingTerm => "ordering_term",
    SortDirection => "sort_direction",
    NullsOrder => "nulls_order",
    LimitClause => "limit_clause",

    // expressions
    Expr => "expr",
    ExprOr => "expr_or",
    ExprAnd => "expr_and",
    ExprNot => "expr_not",
    ExprEq => "expr_eq",
    ExprRel => "expr_rel",
    ExprBit => "expr_bit",
    ExprAdd => "expr_add",
    ExprMul => "expr_mul",
    ExprConcat => "expr_concat",
    ExprPostfix => "expr_postfix",
    Primary => "primary",
    ExprBinary => "expr_binary",
    ExprUnary => "expr_unary",
    ExprIs => "expr_is",
    ExprIn => "expr_in",
    ExprSearch => "expr_search",
    ExprBetween => "expr_between",
    ExprNullTest => "expr_null_test",
    ExprCollate => "expr_collate",
    ExprCast => "expr_cast",
    ExprParen => "expr_paren",
    ExprSubquery => "expr_subquery",
    ExprExists => "expr_exists",
    Literal => "literal",
    Parameter => "parameter",
    ColumnRef => "column_ref",
    FunctionCall => "function_call",
    FilterClause => "filter_clause",
    OverClause => "over_clause",
    CaseExpr => "case_expr",
    WhenClause => "when_clause",
    TypeName => "type_name",
    Ident => "ident",
    BareIdent => "bare_ident",
    Block => "block",

    // expression block contents
    MacroExpr => "macro_expr",
    MacroCall => "macro_call",
    Mapper => "mapper",
    Arguments => "arguments",
}

impl std::fmt::Display for NodeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
