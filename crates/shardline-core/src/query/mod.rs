pub mod builder;
pub mod filter;
pub mod guards;

pub use builder::{
    InsertStatement, OrderBy, Page, Predicate, Query, QueryBuilder, SelectStatement,
    UpdateStatement,
};
pub use filter::{
    filters_from_arguments, parse_sort, validate_filters, validate_sorts, Constraint,
    ConstraintValue, Direction, Filter, Logical, Operator, RawConstraint, Sort, ValidFilter,
    ValidSort,
};
